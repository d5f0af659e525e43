// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::fsio::{is_protected_path, write_with_retry};
use crate::tool::{arg_str, RiskTier, Tool, ToolCall, ToolResult};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if needed \
         and replacing it entirely if it exists.\n\
         Prefer edit_file for targeted changes to existing files."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Moderate
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to write" },
                "content": { "type": "string", "description": "Full file contents" }
            },
            "required": ["path", "content"],
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
        let Some(content) = arg_str(&call.args, "content") else {
            return ToolResult::err(&call.id, "missing 'content' argument");
        };
        let path = PathBuf::from(path);
        if is_protected_path(&path) {
            return ToolResult::err(
                &call.id,
                format!("refusing to write protected path: {}", path.display()),
            );
        }
        debug!(path = %path.display(), bytes = content.len(), "write_file tool");

        match write_with_retry(&path, content.as_bytes()).await {
            Ok(()) => ToolResult::ok(
                &call.id,
                format!("Wrote {} bytes to {}", content.len(), path.display()),
            ),
            Err(e) => ToolResult::err(&call.id, format!("write failed: {e}")),
        }
    }
}
