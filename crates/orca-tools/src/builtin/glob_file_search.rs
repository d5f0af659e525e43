// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{arg_str, arg_u64, RiskTier, Tool, ToolCall, ToolResult};

const DEFAULT_MAX_RESULTS: u64 = 200;

pub struct GlobFileSearchTool;

#[async_trait]
impl Tool for GlobFileSearchTool {
    fn name(&self) -> &str {
        "glob_file_search"
    }

    fn description(&self) -> &str {
        "Find files whose path matches a glob pattern, searching recursively \
         from the given root.\n\
         '*' matches within a path segment, '**' matches across segments, \
         '?' matches one character. Hidden directories and .git are skipped."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::ReadOnly
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob pattern, e.g. '**/*.rs'" },
                "path": { "type": "string", "description": "Root directory (default '.')" },
                "max_results": { "type": "integer", "description": "Result cap (default 200)" }
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

        let Some(re) = glob_to_path_regex(&pattern) else {
            return ToolResult::err(&call.id, format!("invalid glob pattern: {pattern}"));
        };

        let mut matches = Vec::new();
        let mut truncated = false;
        for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if re.is_match(&rel) {
                if matches.len() == cap {
                    truncated = true;
                    break;
                }
                matches.push(rel);
            }
        }
        matches.sort();

        if matches.is_empty() {
            return ToolResult::ok(&call.id, format!("No files match {pattern}"));
        }
        let mut out = matches.join("\n");
        if truncated {
            out.push_str(&format!("\n[... more matches beyond the {cap} cap ...]"));
        }
        ToolResult::ok(&call.id, out)
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with('.'))
}

/// Glob → anchored regex over '/'-separated relative paths.
fn glob_to_path_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Consume a following slash so "**/" also matches zero dirs.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:[^/]+/)*");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}
