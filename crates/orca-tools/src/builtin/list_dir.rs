// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{arg_str, RiskTier, Tool, ToolCall, ToolResult};

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory, one per line. Directories are \
         suffixed with '/'."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::ReadOnly
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list (default '.')" }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let path = arg_str(&call.args, "path").unwrap_or_else(|| ".".into());
        let entries = match std::fs::read_dir(&path) {
            Ok(e) => e,
            Err(e) => return ToolResult::err(&call.id, format!("cannot list {path}: {e}")),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                if e.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();
        if names.is_empty() {
            return ToolResult::ok(&call.id, "(empty directory)");
        }
        ToolResult::ok(&call.id, names.join("\n"))
    }
}
