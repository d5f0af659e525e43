// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Events emitted by the agent while processing one user request.
/// Consumers (the CLI frontend, tests) subscribe to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model.
    TextDelta(String),
    /// The complete text of one model response (after streaming finishes).
    TextComplete(String),
    /// A reasoning chunk; rendered separately from the answer.
    ThinkingDelta(String),
    /// The model requested a tool call.
    ToolCallStarted { call_id: String, name: String, args_json: String },
    /// Incremental output from a streaming tool (e.g. bash).
    ToolOutputChunk { call_id: String, line: String },
    /// A tool call finished.
    ToolCallFinished { call_id: String, name: String, output: String, is_error: bool },
    /// Context was compacted; statistics for the UI.
    ContextCompacted { tokens_before: usize, tokens_after: usize },
    /// The agent finished processing the current user request.
    TurnComplete,
    /// The run was cancelled; any text already streamed is attached.
    Aborted { partial_text: String },
    /// A recoverable error occurred.
    Error(String),
}
