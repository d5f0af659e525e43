// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{arg_str, arg_u64, RiskTier, Tool, ToolCall, ToolResult};

const MAX_BYTES: usize = 200_000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents.\n\
         Use offset/limit (1-based line numbers) to read a window of a large file.\n\
         Output is capped at 200,000 bytes; use the window parameters beyond that."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::ReadOnly
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to read" },
                "offset": { "type": "integer", "description": "First line to read (1-based, optional)" },
                "limit": { "type": "integer", "description": "Number of lines to read (optional)" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(path) = arg_str(&call.args, "path") else {
            return ToolResult::err(&call.id, "missing 'path' argument");
        };
        debug!(path, "read_file tool");

        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => return ToolResult::err(&call.id, format!("cannot read {path}: {e}")),
        };

        let offset = arg_u64(&call.args, "offset").unwrap_or(1).max(1) as usize;
        let limit = arg_u64(&call.args, "limit").map(|n| n as usize);

        let content = match limit {
            None if offset == 1 => text,
            _ => {
                let lines: Vec<&str> = text.lines().collect();
                let start = (offset - 1).min(lines.len());
                let end = match limit {
                    Some(n) => (start + n).min(lines.len()),
                    None => lines.len(),
                };
                lines[start..end].join("\n")
            }
        };

        if content.len() > MAX_BYTES {
            let mut end = MAX_BYTES;
            while end > 0 && !content.is_char_boundary(end) {
                end -= 1;
            }
            return ToolResult::ok(
                &call.id,
                format!(
                    "{}\n...[truncated: {} of {} bytes shown; re-read with offset/limit]",
                    &content[..end],
                    end,
                    content.len()
                ),
            );
        }
        ToolResult::ok(&call.id, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "t1".into(), name: "read_file".into(), args }
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "alpha\nbeta\n").unwrap();
        let out = ReadFileTool.execute(&call(json!({"path": path}))).await;
        assert!(!out.is_error());
        assert_eq!(out.content, "alpha\nbeta\n");
    }

    #[tokio::test]
    async fn window_selects_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "1\n2\n3\n4\n").unwrap();
        let out = ReadFileTool
            .execute(&call(json!({"path": path, "offset": 2, "limit": 2})))
            .await;
        assert_eq!(out.content, "2\n3");
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let out = ReadFileTool.execute(&call(json!({"path": "/nonexistent/x"}))).await;
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn missing_path_is_error() {
        let out = ReadFileTool.execute(&call(json!({}))).await;
        assert!(out.is_error());
        assert!(out.content.contains("missing 'path'"));
    }
}
