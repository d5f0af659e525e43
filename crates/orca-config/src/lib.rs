// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod loader;
pub mod schema;

pub use loader::load;
pub use schema::{
    AgentConfig, Config, HooksConfig, MemoryConfig, ModelConfig, PermissionMode, ToolsConfig,
};

use std::path::PathBuf;

/// Root directory for orca's persistent state (`~/.config/orca` on Linux).
///
/// Sessions, checkpoints, global agent definitions, and global memory all
/// live under this directory.  Falls back to `.orca` in the working directory
/// when no home directory can be determined (containers, stripped-down CI).
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("orca"))
        .unwrap_or_else(|| PathBuf::from(".orca"))
}
