// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::fsio::is_protected_path;
use crate::tool::{arg_str, RiskTier, Tool, ToolCall, ToolResult};

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file or an empty directory.\n\
         System directories, filesystem roots, and the home directory are \
         refused outright, with symlinks resolved before the check."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Dangerous
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to delete" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn mutation_targets(&self, args: &Value) -> Vec<PathBuf> {
        arg_str(args, "path").map(PathBuf::from).into_iter().collect()
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(path) = arg_str(&call.args, "path") else {
            return ToolResult::err(&call.id, "missing 'path' argument");
        };
        let path = PathBuf::from(path);
        if is_protected_path(&path) {
            return ToolResult::err(
                &call.id,
                format!("refusing to delete protected path: {}", path.display()),
            );
        }
        debug!(path = %path.display(), "delete_file tool");

        let result = if path.is_dir() {
            std::fs::remove_dir(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => ToolResult::ok(&call.id, format!("Deleted: {}", path.display())),
            Err(e) => ToolResult::err(&call.id, format!("cannot delete {}: {e}", path.display())),
        }
    }
}
