// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    /// Tools run subject to permissions.
    #[default]
    Normal,
    /// Mutating tools are recorded as planned steps, not executed.
    Plan,
    /// No tool executes at all.
    Ask,
}

impl From<ModeArg> for orca_config::PermissionMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Normal => orca_config::PermissionMode::Normal,
            ModeArg::Plan => orca_config::PermissionMode::Plan,
            ModeArg::Ask => orca_config::PermissionMode::Ask,
        }
    }
}

/// orca — an autonomous coding agent for locally hosted LLMs.
///
/// With a PROMPT argument, runs one request and exits.  Without one, starts
/// an interactive chat loop.  Ctrl-C cancels the current turn; a second
/// Ctrl-C within two seconds exits.
#[derive(Parser, Debug)]
#[command(name = "orca", version, about)]
pub struct Cli {
    /// One-shot prompt; omit for interactive mode.
    pub prompt: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to an explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Model name override.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Base URL override for the OpenAI-compatible server.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Permission mode for this session.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Disable native function calling; use the text tag protocol.
    #[arg(long)]
    pub no_native_tools: bool,

    /// Maximum model turns per request.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Resume a saved session by id.
    #[arg(long, short = 'r')]
    pub resume: Option<String>,

    /// Auto-approve moderate-risk tools for this session.
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Log to stderr (RUST_LOG controls the filter).
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect saved sessions.
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// List the models the configured server advertises.
    Models,
    /// Print the merged configuration and exit.
    ShowConfig,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List sessions, newest first.
    List,
    /// Show the session ancestry tree (forks indented under parents).
    Tree,
    /// Delete a session by id.
    Delete { id: String },
}
