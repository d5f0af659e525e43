// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! String-replacement editing with layered match recovery.
//!
//! The model supplies `old_string` / `new_string` pairs.  Matching tries, in
//! order: exact substring, double-escape unescaping (models sometimes send
//! `\\n` for a newline), then whitespace-normalised line matching.  Two or
//! more candidate positions at the same quality is an ambiguity error — the
//! tool never guesses between them.
//!
//! A call may carry one edit (`path` + strings) or a multi-file `edits`
//! array.  Multi-file edits are three-phase: validate every edit against a
//! read snapshot, compute the final content per file, then write with
//! rollback on failure.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::fsio::{apply_atomic, PendingWrite};
use crate::tool::{arg_bool, arg_str, RiskTier, Tool, ToolCall, ToolResult};

pub struct EditFileTool;

struct Edit {
    path: PathBuf,
    old: String,
    new: String,
    replace_all: bool,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file.\n\
         old_string must match the file content uniquely — include enough \
         surrounding lines to pin down one occurrence, or set replace_all to \
         change every occurrence.\n\
         Multiple files can be edited atomically by passing an 'edits' array \
         of {path, old_string, new_string} objects: either every edit applies \
         or none does."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Moderate
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to edit" },
                "old_string": { "type": "string", "description": "Exact text to replace" },
                "new_string": { "type": "string", "description": "Replacement text" },
                "replace_all": { "type": "boolean", "description": "Replace every occurrence (default false)" },
                "edits": {
                    "type": "array",
                    "description": "Multi-file edit list; overrides the single-edit fields",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" },
                            "old_string": { "type": "string" },
                            "new_string": { "type": "string" }
                        },
                        "required": ["path", "old_string", "new_string"]
                    }
                }
            },
            "additionalProperties": false
        })
    }

    fn mutation_targets(&self, args: &Value) -> Vec<PathBuf> {
        match parse_edits(args) {
            Ok(edits) => edits.into_iter().map(|e| e.path).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let edits = match parse_edits(&call.args) {
            Ok(e) => e,
            Err(msg) => return ToolResult::err(&call.id, msg),
        };
        debug!(files = edits.len(), "edit_file tool");

        // Phase 1+2: validate every edit against a read snapshot and compute
        // the final content per file.  Consecutive edits to the same file
        // chain on the already-edited content.
        let mut contents: Vec<(PathBuf, String)> = Vec::new();
        for edit in &edits {
            let idx = match contents.iter().position(|(p, _)| *p == edit.path) {
                Some(i) => i,
                None => {
                    let text = match std::fs::read_to_string(&edit.path) {
                        Ok(t) => t,
                        Err(e) => {
                            return ToolResult::err(
                                &call.id,
                                format!(
                                    "cannot read {}: {e}; use read_file to see current content",
                                    edit.path.display()
                                ),
                            )
                        }
                    };
                    contents.push((edit.path.clone(), text));
                    contents.len() - 1
                }
            };
            let current = &mut contents[idx].1;
            match apply_edit(current, &edit.old, &edit.new, edit.replace_all) {
                Ok(updated) => *current = updated,
                Err(msg) => {
                    return ToolResult::err(
                        &call.id,
                        format!("edit failed in {}: {msg}", edit.path.display()),
                    )
                }
            }
        }

        // Phase 3: write sequentially, rolling back on failure.
        let writes: Vec<PendingWrite> = contents
            .into_iter()
            .map(|(path, content)| PendingWrite { path, content })
            .collect();
        match apply_atomic(&writes).await {
            Ok(()) => {
                let files: Vec<String> =
                    writes.iter().map(|w| w.path.display().to_string()).collect();
                ToolResult::ok(&call.id, format!("Edited: {}", files.join(", ")))
            }
            Err(e) => ToolResult::err(&call.id, format!("write failed (rolled back): {e}")),
        }
    }
}

fn parse_edits(args: &Value) -> Result<Vec<Edit>, String> {
    if let Some(list) = args.get("edits").and_then(|v| v.as_array()) {
        if list.is_empty() {
            return Err("'edits' array is empty".into());
        }
        let mut edits = Vec::with_capacity(list.len());
        for (i, item) in list.iter().enumerate() {
            let path = arg_str(item, "path").ok_or(format!("edits[{i}] missing 'path'"))?;
            let old =
                arg_str(item, "old_string").ok_or(format!("edits[{i}] missing 'old_string'"))?;
            let new =
                arg_str(item, "new_string").ok_or(format!("edits[{i}] missing 'new_string'"))?;
            edits.push(Edit { path: PathBuf::from(path), old, new, replace_all: false });
        }
        return Ok(edits);
    }

    let path = arg_str(args, "path").ok_or("missing 'path' argument")?;
    let old = arg_str(args, "old_string").ok_or("missing 'old_string' argument")?;
    let new = arg_str(args, "new_string").ok_or("missing 'new_string' argument")?;
    Ok(vec![Edit {
        path: PathBuf::from(path),
        old,
        new,
        replace_all: arg_bool(args, "replace_all").unwrap_or(false),
    }])
}

/// Apply one replacement to `content`, trying the recovery ladder.
fn apply_edit(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<String, String> {
    if old.is_empty() {
        return Err("old_string is empty".into());
    }
    if old == new {
        return Err("old_string and new_string are identical".into());
    }

    // Exact match.
    match content.matches(old).count() {
        1 => return Ok(content.replacen(old, new, 1)),
        n if n > 1 => {
            if replace_all {
                return Ok(content.replace(old, new));
            }
            return Err(format!(
                "old_string matches {n} locations; add surrounding context or set replace_all"
            ));
        }
        _ => {}
    }

    // Double-escape recovery: the model sent "\\n" meaning a newline.
    let unescaped = unescape_double(old);
    if unescaped != old {
        match content.matches(unescaped.as_str()).count() {
            1 => return Ok(content.replacen(unescaped.as_str(), &unescape_double(new), 1)),
            n if n > 1 && replace_all => {
                return Ok(content.replace(unescaped.as_str(), &unescape_double(new)))
            }
            n if n > 1 => {
                return Err(format!(
                    "old_string matches {n} locations; add surrounding context or set replace_all"
                ))
            }
            _ => {}
        }
    }

    // Whitespace-normalised line matching.
    whitespace_normalized_replace(content, old, new)
}

/// Turn literal `\\n` / `\\t` / `\\"` sequences into their characters.
fn unescape_double(s: &str) -> String {
    s.replace("\\n", "\n").replace("\\t", "\t").replace("\\\"", "\"")
}

/// Match `old` against `content` comparing lines with leading/trailing
/// whitespace stripped.  Exactly one candidate window is replaced (keeping
/// the window's own lines for context outside the replacement); two or more
/// candidates fail as ambiguous.
fn whitespace_normalized_replace(
    content: &str,
    old: &str,
    new: &str,
) -> Result<String, String> {
    let content_lines: Vec<&str> = content.lines().collect();
    let old_lines: Vec<&str> = old.lines().collect();
    if old_lines.is_empty() || content_lines.len() < old_lines.len() {
        return Err("old_string not found; use read_file to see current content".into());
    }

    let norm = |l: &str| l.trim().to_string();
    let old_norm: Vec<String> = old_lines.iter().map(|l| norm(l)).collect();

    let candidates: Vec<usize> = (0..=content_lines.len() - old_lines.len())
        .filter(|&i| {
            content_lines[i..i + old_lines.len()]
                .iter()
                .map(|l| norm(l))
                .eq(old_norm.iter().cloned())
        })
        .collect();

    match candidates.as_slice() {
        [] => Err("old_string not found; use read_file to see current content".into()),
        [pos] => {
            let trailing_newline = content.ends_with('\n');
            let mut out: Vec<String> = Vec::with_capacity(content_lines.len());
            out.extend(content_lines[..*pos].iter().map(|l| l.to_string()));
            out.extend(new.lines().map(|l| l.to_string()));
            out.extend(content_lines[pos + old_lines.len()..].iter().map(|l| l.to_string()));
            let mut joined = out.join("\n");
            if trailing_newline {
                joined.push('\n');
            }
            Ok(joined)
        }
        many => Err(format!(
            "old_string matches {} locations after whitespace normalisation; add context",
            many.len()
        )),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
