// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt assembly and the synthetic protocol messages (nudges,
//! compaction instruction).

use orca_tools::ToolSchema;

const BASE_PROMPT: &str = "\
You are orca, an autonomous coding agent running in a terminal. You help the \
user by reading and editing files, running commands, and searching the web, \
using the tools provided. Work step by step: inspect before you modify, \
verify after you change. When a task is complete, answer in plain text \
without calling further tools.";

/// Assemble the system prompt for a session.
///
/// `custom` fully replaces the base instructions when set (config
/// `system_prompt`).  Memory context and the text tool protocol are appended
/// as separate sections when present.
pub fn system_prompt(
    custom: Option<&str>,
    workdir: &str,
    memory_context: &str,
    text_tool_protocol: Option<&str>,
) -> String {
    let mut prompt = custom.unwrap_or(BASE_PROMPT).to_string();
    prompt.push_str(&format!(
        "\n\nWorking directory: {workdir}\nPlatform: {}",
        std::env::consts::OS
    ));
    if !memory_context.is_empty() {
        prompt.push_str("\n\n## Notes from previous sessions\n\n");
        prompt.push_str(memory_context);
    }
    if let Some(protocol) = text_tool_protocol {
        prompt.push_str("\n\n");
        prompt.push_str(protocol);
    }
    prompt
}

/// Tool-calling instructions for backends without native function calling:
/// the tag protocol plus the tool catalogue.
pub fn text_tool_protocol(schemas: &[ToolSchema]) -> String {
    let mut out = String::from(
        "## Tool calling\n\n\
         To call a tool, emit exactly this tag form in your response:\n\n\
         <tool_call>{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}</tool_call>\n\n\
         You may emit several tool_call blocks in one response; they run in \
         order. After the results come back, continue or answer in plain \
         text.\n\n### Available tools\n",
    );
    for s in schemas {
        out.push_str(&format!(
            "\n#### {}\n{}\nParameters (JSON Schema): {}\n",
            s.name, s.description, s.parameters
        ));
    }
    out
}

/// Synthetic user message sent when the model described a tool action in
/// prose instead of emitting a parseable call.
pub const TOOL_NUDGE: &str = "\
Your last response described an action but did not call a tool. To act, emit \
the call in the tag form, for example:\n\
<tool_call>{\"name\": \"write_file\", \"arguments\": {\"path\": \"foo.txt\", \
\"content\": \"bar\"}}</tool_call>\n\
Re-emit your intended action as a tool call now.";

/// Synthetic user message sent when a tool call was cut off mid-generation.
pub const CONTINUATION_NUDGE: &str = "\
Your tool call was cut off before it was complete. Re-emit the entire call \
from the beginning, inside a single <tool_call>...</tool_call> block.";

/// Instruction for the end-of-conversation learnings note (auto-memory).
pub const MEMORY_PROMPT: &str = "\
Review the conversation below and write ONE short paragraph of durable \
learnings worth remembering for future sessions in this project: build \
quirks, conventions, decisions, gotchas. Reply with the paragraph only. \
If nothing is worth remembering, reply with exactly: NOTHING";

/// Instruction for the tool-free summarisation turn during compaction.
pub const COMPACTION_PROMPT: &str = "\
You are a context compaction assistant. Summarise the following conversation \
history in a concise, information-dense way. Preserve technical details, \
decisions, file names, code snippets, and tool outputs that may matter for \
future work. The summary will replace the original history to free up \
context space. Reply with the summary text only.";

// ─── Unit tests ──────────────────────────────────────────────────────────────
