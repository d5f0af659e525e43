// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Extraction of tool calls from free-form assistant text.
//!
//! Local models emit tool calls in several shapes.  In precedence order:
//!
//! 1. `<tool_call>{"name": ..., "arguments": {...}}</tool_call>` tag blocks
//!    (several may appear in one response)
//! 2. bare JSON objects with `name` and `arguments`
//! 3. JSON inside a fenced code block — only when no tag form is present
//!    anywhere in the response
//!
//! `<think>…</think>` spans are stripped before any parsing.  The module
//! also detects mid-generation truncation (an unclosed tag or brace) and
//! prose that talks about a tool instead of calling one, so the engine can
//! nudge the model back onto the protocol.

use serde_json::{Map, Value};

/// A tool call parsed out of assistant text (no call id yet — the engine
/// assigns synthetic ids when pairing results).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub name: String,
    pub args: Map<String, Value>,
}

// ─── <think> stripping ────────────────────────────────────────────────────────

/// Remove every `<think>…</think>` span.  An unclosed `<think>` swallows the
/// rest of the text — a truncated thinking block carries no response content.
pub fn strip_think(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find("<think>") {
            None => {
                out.push_str(rest);
                return out;
            }
            Some(open) => {
                out.push_str(&rest[..open]);
                match rest[open..].find("</think>") {
                    Some(close_rel) => {
                        rest = &rest[open + close_rel + "</think>".len()..];
                    }
                    None => return out,
                }
            }
        }
    }
}

// ─── Call extraction ──────────────────────────────────────────────────────────

/// Extract all tool calls from `text` (think spans stripped first).
pub fn parse_tool_calls(text: &str) -> Vec<ParsedCall> {
    let text = strip_think(text);

    let tagged = parse_tagged(&text);
    if !tagged.is_empty() {
        return tagged;
    }

    let bare = parse_bare_json(&text, false);
    if !bare.is_empty() {
        return bare;
    }

    // Fenced code blocks are only consulted when no tag form appears
    // anywhere (a fenced example next to a real tagged call must not
    // double-fire).
    if !text.contains("<tool_call>") {
        return parse_fenced(&text);
    }
    Vec::new()
}

fn parse_tagged(text: &str) -> Vec<ParsedCall> {
    let mut calls = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("<tool_call>") {
        let after = &rest[open + "<tool_call>".len()..];
        let Some(close) = after.find("</tool_call>") else {
            break; // unclosed: truncation, handled separately
        };
        if let Some(call) = parse_call_object(after[..close].trim()) {
            calls.push(call);
        }
        rest = &after[close + "</tool_call>".len()..];
    }
    calls
}

/// Scan for balanced top-level JSON objects and keep those that look like
/// calls.  When `inside_fence` is false, fenced regions are skipped so the
/// fence rule keeps its precedence.
fn parse_bare_json(text: &str, inside_fence: bool) -> Vec<ParsedCall> {
    let mut calls = Vec::new();
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('{') {
        let start = search_from + rel;
        if !inside_fence && in_fenced_block(text, start) {
            search_from = start + 1;
            continue;
        }
        match balanced_object_end(&text[start..]) {
            Some(len) => {
                if let Some(call) = parse_call_object(&text[start..start + len]) {
                    calls.push(call);
                }
                search_from = start + len;
            }
            None => break,
        }
    }
    calls
}

fn parse_fenced(text: &str) -> Vec<ParsedCall> {
    let mut calls = Vec::new();
    for block in fenced_blocks(text) {
        calls.extend(parse_bare_json(&block, true));
    }
    calls
}

/// The inner text of each ``` fence, with any language tag line removed.
fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let Some(close) = after[body_start..].find("```") else {
            break;
        };
        blocks.push(after[body_start..body_start + close].to_string());
        rest = &after[body_start + close + 3..];
    }
    blocks
}

/// True when byte offset `pos` falls inside a ``` fence.
fn in_fenced_block(text: &str, pos: usize) -> bool {
    text[..pos].matches("```").count() % 2 == 1
}

/// Length of the balanced JSON object starting at the `{` at offset 0, or
/// `None` when the text ends before the object closes.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse one JSON object as a call: requires a `name` string and an
/// `arguments` object (a JSON-string `arguments` is parsed leniently).
fn parse_call_object(json: &str) -> Option<ParsedCall> {
    let v: Value = serde_json::from_str(json).ok()?;
    let name = v.get("name")?.as_str()?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    let args = match v.get("arguments") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|v| v.as_object().cloned())?,
        None | Some(Value::Null) => Map::new(),
        _ => return None,
    };
    Some(ParsedCall { name, args })
}

// ─── Truncation and nudge detection ───────────────────────────────────────────

/// True when the response was cut off mid-call: an unclosed `<tool_call>`
/// tag, or a trailing call-shaped JSON object missing its closing brace.
pub fn detect_truncation(text: &str) -> bool {
    let text = strip_think(text);

    if let Some(open) = text.rfind("<tool_call>") {
        if !text[open..].contains("</tool_call>") {
            return true;
        }
    }

    // Trailing unbalanced object that was shaping up to be a call.
    if let Some(start) = text.rfind('{') {
        // Walk back to the outermost unclosed brace.
        let mut outer = start;
        for (i, _) in text.match_indices('{') {
            if balanced_object_end(&text[i..]).is_none() {
                outer = i;
                break;
            }
        }
        if balanced_object_end(&text[outer..]).is_none() {
            let tail = &text[outer..];
            return tail.contains("\"name\"") || tail.contains("\"arguments\"");
        }
    }
    false
}

/// True when the response talks about using a tool (or dumps a code block)
/// without producing a parseable call — the cue for a protocol nudge.
pub fn describes_tool_usage(text: &str, tool_names: &[String]) -> bool {
    let text = strip_think(text);
    if !parse_tool_calls(&text).is_empty() {
        return false;
    }
    if text.contains("```") {
        return true;
    }
    let lower = text.to_lowercase();
    tool_names.iter().any(|n| lower.contains(n.as_str()))
}

// ─── Argument shaping ─────────────────────────────────────────────────────────

/// Synonym table applied before schema validation.  A rewrite only happens
/// when the canonical key exists in the schema and is not already present in
/// the arguments — anything ambiguous is left alone.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("file_path", "path"),
    ("filepath", "path"),
    ("filename", "path"),
    ("file", "path"),
    ("dir", "path"),
    ("folder", "path"),
    ("directory", "path"),
    ("cmd", "command"),
    ("script", "command"),
    ("find", "old_string"),
    ("search_string", "old_string"),
    ("replace", "new_string"),
    ("replacement", "new_string"),
    ("text", "content"),
    ("contents", "content"),
    ("body", "content"),
    ("query", "pattern"),
    ("regex", "pattern"),
    ("search", "pattern"),
];

/// Schema-guided argument shaping: alias resolution, then missing-required
/// inference.  Both steps are no-ops when ambiguous.
pub fn shape_arguments(args: Map<String, Value>, schema: &Value) -> Map<String, Value> {
    let shaped = resolve_aliases(args, schema);
    infer_missing_required(shaped, schema)
}

/// Rewrite known synonym keys to their canonical names.
pub fn resolve_aliases(mut args: Map<String, Value>, schema: &Value) -> Map<String, Value> {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return args;
    };
    for (alias, canonical) in KEY_ALIASES {
        if args.contains_key(*alias)
            && properties.contains_key(*canonical)
            && !args.contains_key(*canonical)
            && !properties.contains_key(*alias)
        {
            let value = args.remove(*alias).unwrap();
            args.insert((*canonical).to_string(), value);
        }
    }
    args
}

/// When exactly one required string parameter is missing and exactly one
/// unrecognised string argument is present, remap it.  Otherwise unchanged.
pub fn infer_missing_required(
    mut args: Map<String, Value>,
    schema: &Value,
) -> Map<String, Value> {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return args;
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let is_string_param = |key: &str| {
        properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(|t| t.as_str())
            == Some("string")
    };

    let missing: Vec<&str> = required
        .iter()
        .filter(|k| !args.contains_key(**k) && is_string_param(k))
        .copied()
        .collect();
    let unrecognised: Vec<String> = args
        .iter()
        .filter(|(k, v)| !properties.contains_key(*k) && v.is_string())
        .map(|(k, _)| k.clone())
        .collect();

    if let ([target], [source]) = (missing.as_slice(), unrecognised.as_slice()) {
        let value = args.remove(source).unwrap();
        args.insert(target.to_string(), value);
    }
    args
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    // ── think stripping ───────────────────────────────────────────────────────

    #[test]
    fn strip_think_removes_spans() {
        assert_eq!(strip_think("a<think>reasoning</think>b"), "ab");
    }

    #[test]
    fn strip_think_swallows_unclosed_block() {
        assert_eq!(strip_think("answer<think>still going"), "answer");
    }

    #[test]
    fn calls_inside_think_are_not_parsed() {
        let text = r#"<think><tool_call>{"name":"bash","arguments":{}}</tool_call></think>ok"#;
        assert!(parse_tool_calls(text).is_empty());
    }

    // ── tag form ──────────────────────────────────────────────────────────────

    #[test]
    fn parses_single_tag_block() {
        let text = r#"Doing it.
<tool_call>{"name": "write_file", "arguments": {"path": "foo.txt", "content": "bar"}}</tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "write_file");
        assert_eq!(calls[0].args["path"], "foo.txt");
    }

    #[test]
    fn parses_multiple_tag_blocks() {
        let text = concat!(
            r#"<tool_call>{"name":"read_file","arguments":{"path":"a"}}</tool_call>"#,
            "\n",
            r#"<tool_call>{"name":"read_file","arguments":{"path":"b"}}</tool_call>"#
        );
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].args["path"], "b");
    }

    #[test]
    fn string_encoded_arguments_are_parsed() {
        let text = r#"<tool_call>{"name":"bash","arguments":"{\"command\":\"ls\"}"}</tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls[0].args["command"], "ls");
    }

    // ── bare JSON form ────────────────────────────────────────────────────────

    #[test]
    fn parses_bare_json_call() {
        let text = r#"I'll run it: {"name": "bash", "arguments": {"command": "ls"}}"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
    }

    #[test]
    fn ignores_json_without_call_shape() {
        let text = r#"Config is {"debug": true, "level": 3}"#;
        assert!(parse_tool_calls(text).is_empty());
    }

    #[test]
    fn nested_braces_in_arguments_survive() {
        let text = r#"{"name":"write_file","arguments":{"path":"a.json","content":"{\"k\": {\"n\": 1}}"}}"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args["content"], "{\"k\": {\"n\": 1}}");
    }

    // ── fenced form ───────────────────────────────────────────────────────────

    #[test]
    fn fenced_json_parses_when_no_tag_present() {
        let text = "Run this:\n```json\n{\"name\":\"bash\",\"arguments\":{\"command\":\"ls\"}}\n```";
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn fenced_json_ignored_when_tag_form_present() {
        let text = concat!(
            "```json\n{\"name\":\"bash\",\"arguments\":{\"command\":\"echo fenced\"}}\n```\n",
            r#"<tool_call>{"name":"bash","arguments":{"command":"echo tagged"}}</tool_call>"#
        );
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args["command"], "echo tagged");
    }

    // ── truncation detection ──────────────────────────────────────────────────

    #[test]
    fn unclosed_tag_is_truncation() {
        let text = r#"<tool_call>{"name":"write_file","arguments":{"path":"a""#;
        assert!(detect_truncation(text));
    }

    #[test]
    fn trailing_unbalanced_call_json_is_truncation() {
        let text = r#"{"name": "bash", "arguments": {"command": "really long comman"#;
        assert!(detect_truncation(text));
    }

    #[test]
    fn complete_call_is_not_truncation() {
        let text = r#"<tool_call>{"name":"bash","arguments":{}}</tool_call>"#;
        assert!(!detect_truncation(text));
    }

    #[test]
    fn plain_prose_is_not_truncation() {
        assert!(!detect_truncation("All done. The file { } looks fine."));
    }

    // ── nudge detection ───────────────────────────────────────────────────────

    #[test]
    fn code_block_without_call_wants_nudge() {
        let names = vec!["write_file".to_string()];
        assert!(describes_tool_usage("You can write:\n```bar```", &names));
    }

    #[test]
    fn tool_name_mention_wants_nudge() {
        let names = vec!["write_file".to_string()];
        assert!(describes_tool_usage("I would use write_file here.", &names));
    }

    #[test]
    fn parseable_call_needs_no_nudge() {
        let names = vec!["bash".to_string()];
        let text = r#"<tool_call>{"name":"bash","arguments":{}}</tool_call>"#;
        assert!(!describes_tool_usage(text, &names));
    }

    #[test]
    fn plain_answer_needs_no_nudge() {
        let names = vec!["bash".to_string()];
        assert!(!describes_tool_usage("The answer is 42.", &names));
    }

    // ── alias resolution ──────────────────────────────────────────────────────

    #[test]
    fn alias_rewrites_to_canonical() {
        let args = json!({"file_path": "a.txt", "content": "x"}).as_object().unwrap().clone();
        let shaped = resolve_aliases(args, &schema());
        assert_eq!(shaped["path"], "a.txt");
        assert!(!shaped.contains_key("file_path"));
    }

    #[test]
    fn alias_noop_when_canonical_already_present() {
        let args = json!({"file_path": "b.txt", "path": "a.txt"}).as_object().unwrap().clone();
        let shaped = resolve_aliases(args, &schema());
        assert_eq!(shaped["path"], "a.txt");
        assert_eq!(shaped["file_path"], "b.txt");
    }

    #[test]
    fn alias_noop_when_canonical_not_in_schema() {
        let schema = json!({"type": "object", "properties": {"url": {"type": "string"}}});
        let args = json!({"file_path": "a.txt"}).as_object().unwrap().clone();
        let shaped = resolve_aliases(args, &schema);
        assert_eq!(shaped["file_path"], "a.txt");
        assert!(!shaped.contains_key("path"));
    }

    // ── missing-required inference ────────────────────────────────────────────

    #[test]
    fn single_missing_single_unknown_remaps() {
        let args = json!({"content": "x", "destination": "a.txt"}).as_object().unwrap().clone();
        let shaped = infer_missing_required(args, &schema());
        assert_eq!(shaped["path"], "a.txt");
        assert!(!shaped.contains_key("destination"));
    }

    #[test]
    fn two_missing_required_is_ambiguous() {
        let args = json!({"destination": "a.txt"}).as_object().unwrap().clone();
        let shaped = infer_missing_required(args.clone(), &schema());
        assert_eq!(shaped, args);
    }

    #[test]
    fn two_unknown_args_is_ambiguous() {
        let args = json!({"content": "x", "dest": "a", "target": "b"})
            .as_object()
            .unwrap()
            .clone();
        let shaped = infer_missing_required(args.clone(), &schema());
        assert_eq!(shaped, args);
    }

    #[test]
    fn non_string_unknown_is_not_remapped() {
        let args = json!({"content": "x", "destination": 5}).as_object().unwrap().clone();
        let shaped = infer_missing_required(args.clone(), &schema());
        assert_eq!(shaped, args);
    }
}
