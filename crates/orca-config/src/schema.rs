// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless explicitly
/// disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name forwarded to the chat-completions API.
    pub name: String,
    /// Base URL of the OpenAI-compatible server, ending before
    /// `/chat/completions` (e.g. `http://localhost:11434/v1`).
    pub base_url: String,
    /// Optional API key.  Local servers (Ollama, llama.cpp, LM Studio)
    /// typically need none.
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    /// Prefer this over `api_key` in version-controlled config files.
    pub api_key_env: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Context window of the loaded model, in tokens.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Use the provider's native function-calling protocol.  When `false`
    /// (or after an automatic downgrade) tool calls are exchanged as tagged
    /// text in the assistant response.
    #[serde(default = "default_true")]
    pub native_tools: bool,
    /// Seconds of stream silence before a turn is considered stalled.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_context_window() -> usize {
    32_768
}
fn default_idle_timeout() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "qwen2.5-coder:14b".into(),
            base_url: "http://localhost:11434/v1".into(),
            api_key: None,
            api_key_env: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            context_window: default_context_window(),
            native_tools: true,
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

/// Permission mode governing tool execution for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Tools run subject to the allow/deny lists and risk tiers.
    #[default]
    Normal,
    /// Non-read-only tools are recorded as planned steps, not executed.
    Plan,
    /// No tool executes; the model can only answer from context.
    Ask,
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionMode::Normal => write!(f, "normal"),
            PermissionMode::Plan => write!(f, "plan"),
            PermissionMode::Ask => write!(f, "ask"),
        }
    }
}

fn default_max_iterations() -> u32 {
    25
}
fn default_compaction_threshold() -> f32 {
    0.8
}
fn default_preserve_recent() -> usize {
    4
}
fn default_chars_per_token() -> f32 {
    3.5
}
fn default_subagent_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Permission mode when none is given on the CLI.
    #[serde(default)]
    pub default_mode: PermissionMode,
    /// Maximum model turns per user request before the loop gives up.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Fraction of the context window at which compaction triggers.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of trailing user messages preserved verbatim by compaction.
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent: usize,
    /// Characters-per-token ratio for the cheap context estimate.
    /// Structured tool-call payloads are charged at 75% of this ratio.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f32,
    /// Wall-clock cap for one agent loop, in seconds.  0 disables.
    #[serde(default)]
    pub loop_timeout_secs: u64,
    /// Wall-clock cap for a single sub-agent, in seconds.
    #[serde(default = "default_subagent_timeout")]
    pub subagent_timeout_secs: u64,
    /// Override for the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: PermissionMode::Normal,
            max_iterations: default_max_iterations(),
            compaction_threshold: default_compaction_threshold(),
            preserve_recent: default_preserve_recent(),
            chars_per_token: default_chars_per_token(),
            loop_timeout_secs: 0,
            subagent_timeout_secs: default_subagent_timeout(),
            system_prompt: None,
        }
    }
}

fn default_bash_timeout() -> u64 {
    30
}
fn default_min_request_interval_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tool names (or `name(arg glob)` patterns) that always run without a
    /// prompt.  Tool names match case-insensitively.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tool names or patterns that are always refused.  Deny wins over allow.
    #[serde(default)]
    pub deny: Vec<String>,
    /// Auto-approve every tool whose risk tier is at most moderate.
    #[serde(default)]
    pub auto_approve_moderate: bool,
    /// Auto-approve everything, including dangerous tools.
    #[serde(default)]
    pub auto_approve_all: bool,
    /// Default timeout for the bash tool, in seconds.
    #[serde(default = "default_bash_timeout")]
    pub bash_timeout_secs: u64,
    /// Minimum delay between two HTTP requests to the same host, in ms.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            auto_approve_moderate: false,
            auto_approve_all: false,
            bash_timeout_secs: default_bash_timeout(),
            min_request_interval_ms: default_min_request_interval_ms(),
        }
    }
}

/// Shell commands run around each tool call, keyed by tool name or `*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Pre-hooks: a non-zero exit blocks the tool.
    #[serde(default)]
    pub pre: HashMap<String, String>,
    /// Post-hooks: exit codes are logged, never propagated.
    #[serde(default)]
    pub post: HashMap<String, String>,
}

fn default_max_memory_files() -> usize {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Write a learnings note at the end of each conversation.
    #[serde(default)]
    pub auto_memory: bool,
    /// Oldest memory files are pruned beyond this count.
    #[serde(default = "default_max_memory_files")]
    pub max_memory_files: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auto_memory: false,
            max_memory_files: default_max_memory_files(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
