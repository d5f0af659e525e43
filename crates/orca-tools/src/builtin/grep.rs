// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{arg_str, arg_u64, RiskTier, Tool, ToolCall, ToolResult};

const DEFAULT_MAX_RESULTS: u64 = 100;
const MAX_FILE_BYTES: u64 = 2_000_000;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression, recursively from the \
         given root.  Results are 'path:line: text' lines, leading matches \
         first.  Binary-looking and oversized files are skipped."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::ReadOnly
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression to search for" },
                "path": { "type": "string", "description": "Root directory or file (default '.')" },
                "max_results": { "type": "integer", "description": "Result cap (default 100)" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(pattern) = arg_str(&call.args, "pattern") else {
            return ToolResult::err(&call.id, "missing 'pattern' argument");
        };
        let root = arg_str(&call.args, "path").unwrap_or_else(|| ".".into());
        let cap = arg_u64(&call.args, "max_results").unwrap_or(DEFAULT_MAX_RESULTS) as usize;

        let re = match Regex::new(&pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(&call.id, format!("invalid pattern: {e}")),
        };

        let mut hits = Vec::new();
        'walk: for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue; // non-UTF-8, treat as binary
            };
            for (lineno, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(format!("{}:{}: {}", entry.path().display(), lineno + 1, line));
                    if hits.len() == cap {
                        hits.push(format!("[... stopped at the {cap}-match cap ...]"));
                        break 'walk;
                    }
                }
            }
        }

        if hits.is_empty() {
            return ToolResult::ok(&call.id, format!("No matches for /{pattern}/"));
        }
        ToolResult::ok(&call.id, hits.join("\n"))
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "t1".into(), name: "grep".into(), args }
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing\nneedle here\n").unwrap();
        let out = GrepTool
            .execute(&call(json!({"pattern": "needle", "path": dir.path()})))
            .await;
        assert!(out.content.contains("a.txt:2: needle here"));
    }

    #[tokio::test]
    async fn no_match_message() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let out = GrepTool
            .execute(&call(json!({"pattern": "zzz", "path": dir.path()})))
            .await;
        assert!(out.content.contains("No matches"));
    }

    #[tokio::test]
    async fn invalid_regex_is_error() {
        let out = GrepTool.execute(&call(json!({"pattern": "("}))).await;
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn result_cap_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let body = "hit\n".repeat(50);
        std::fs::write(dir.path().join("a.txt"), body).unwrap();
        let out = GrepTool
            .execute(&call(json!({"pattern": "hit", "path": dir.path(), "max_results": 10})))
            .await;
        assert_eq!(out.content.lines().count(), 11); // 10 hits + cap notice
    }
}
