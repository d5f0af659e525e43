// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod checkpoint;
pub mod fsio;
pub mod hooks;
pub mod memory;
pub mod permissions;
pub mod process;
pub mod rate_limit;
pub mod registry;
pub mod tool;

pub use checkpoint::{CheckpointEntry, CheckpointStore};
pub use hooks::{HookRunner, PreHookOutcome};
pub use memory::MemoryStore;
pub use permissions::{
    PermissionGate, PermissionPrompter, PermissionVerdict, PlannedStep, PromptChoice,
};
pub use process::{ProcessRecord, ProcessSupervisor};
pub use rate_limit::RateLimiter;
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{OutputSink, RiskTier, Tool, ToolCall, ToolResult, ToolStatus};

pub use builtin::bash::BashTool;
pub use builtin::delete_file::DeleteFileTool;
pub use builtin::edit_file::EditFileTool;
pub use builtin::glob_file_search::GlobFileSearchTool;
pub use builtin::grep::GrepTool;
pub use builtin::list_dir::ListDirTool;
pub use builtin::memorize::MemorizeTool;
pub use builtin::process_tools::{GetProcessOutputTool, ListProcessesTool, StopProcessTool};
pub use builtin::read_file::ReadFileTool;
pub use builtin::web_fetch::WebFetchTool;
pub use builtin::write_file::WriteFileTool;

use std::sync::Arc;

/// Register the built-in tool catalogue.
///
/// Tools that need shared state (process supervisor, rate limiter, memory
/// store) receive it here; callback surfaces (permission prompter, sub-agent
/// spawner) are wired after registration.
pub fn builtin_registry(
    supervisor: Arc<ProcessSupervisor>,
    limiter: Arc<RateLimiter>,
    memory: Arc<MemoryStore>,
    bash_timeout_secs: u64,
) -> anyhow::Result<ToolRegistry> {
    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool)?;
    reg.register(ListDirTool)?;
    reg.register(GlobFileSearchTool)?;
    reg.register(GrepTool)?;
    reg.register(WriteFileTool)?;
    reg.register(EditFileTool)?;
    reg.register(DeleteFileTool)?;
    reg.register(BashTool {
        supervisor: Arc::clone(&supervisor),
        default_timeout_secs: bash_timeout_secs,
    })?;
    reg.register(GetProcessOutputTool { supervisor: Arc::clone(&supervisor) })?;
    reg.register(StopProcessTool { supervisor: Arc::clone(&supervisor) })?;
    reg.register(ListProcessesTool { supervisor })?;
    reg.register(WebFetchTool { limiter })?;
    reg.register(MemorizeTool { store: memory })?;
    Ok(reg)
}
