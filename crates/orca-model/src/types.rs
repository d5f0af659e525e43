// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function call requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Opaque identifier forwarded verbatim when returning the result.
    pub call_id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub args: serde_json::Map<String, Value>,
}

impl FunctionCall {
    /// Canonical JSON serialization of the arguments.  Used for permission
    /// glob matching, hook environment variables, and call deduplication.
    pub fn args_json(&self) -> String {
        Value::Object(self.args.clone()).to_string()
    }
}

/// The result of a function call, paired by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub call_id: String,
    /// Tool name, kept so the result can be rendered as plain text for
    /// backends without native tool-result support.
    pub name: String,
    pub result: String,
}

/// One ordered content item inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    Call(FunctionCall),
    Result(FunctionResult),
}

/// A single message in the conversation history: a role plus an ordered list
/// of content items.  An assistant message may mix a text span with one or
/// more function calls; a tool message carries function results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub items: Vec<ContentItem>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, items: vec![ContentItem::Text { text: text.into() }] }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, items: vec![ContentItem::Text { text: text.into() }] }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, items: vec![ContentItem::Text { text: text.into() }] }
    }

    /// An assistant message carrying a text span (possibly empty) plus the
    /// function calls emitted in the same turn.
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<FunctionCall>) -> Self {
        let text = text.into();
        let mut items = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            items.push(ContentItem::Text { text });
        }
        items.extend(calls.into_iter().map(ContentItem::Call));
        Self { role: Role::Assistant, items }
    }

    /// A tool message holding one function result.
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            items: vec![ContentItem::Result(FunctionResult {
                call_id: call_id.into(),
                name: name.into(),
                result: result.into(),
            })],
        }
    }

    /// The concatenated text spans of this message.
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(|i| match i {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Borrow the single text span, if this message is text-only.
    pub fn as_text(&self) -> Option<&str> {
        match self.items.as_slice() {
            [ContentItem::Text { text }] => Some(text),
            _ => None,
        }
    }

    /// All function calls in this message, in emission order.
    pub fn calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.items.iter().filter_map(|i| match i {
            ContentItem::Call(c) => Some(c),
            _ => None,
        })
    }

    /// All function results in this message.
    pub fn results(&self) -> impl Iterator<Item = &FunctionResult> {
        self.items.iter().filter_map(|i| match i {
            ContentItem::Result(r) => Some(r),
            _ => None,
        })
    }

    /// Approximate token cost of this message for context budgeting.
    ///
    /// Natural-language text is charged `chars / chars_per_token`; structured
    /// call and result payloads pack more tokens per character and are
    /// charged at 75% of the ratio.  No tokenizer dependency — this is a
    /// deliberately cheap proxy.
    pub fn approx_tokens(&self, chars_per_token: f32) -> usize {
        let structured_ratio = chars_per_token * 0.75;
        let mut tokens = 0.0f32;
        for item in &self.items {
            match item {
                ContentItem::Text { text } => tokens += text.len() as f32 / chars_per_token,
                ContentItem::Call(c) => {
                    let chars = c.name.len() + c.args_json().len();
                    tokens += chars as f32 / structured_ratio;
                }
                ContentItem::Result(r) => {
                    tokens += r.result.len() as f32 / structured_ratio;
                }
            }
        }
        (tokens as usize).max(1)
    }
}

// ─── Request / response types ─────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// Request sent to a model backend.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// Function descriptors for native tool calling.  Empty in text-protocol
    /// mode (the tool catalogue then lives in the system prompt).
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
    /// When `false`, function results are rendered as plain user-role text on
    /// the wire instead of tool-role messages.  A request never mixes the
    /// two encodings.
    pub native_tool_results: bool,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta streamed from the model.
    TextDelta(String),
    /// A reasoning delta (`reasoning_content`); rendered separately.
    ThinkingDelta(String),
    /// The model wants to call a tool.
    ToolCall {
        /// Parallel-call index from the provider; routes delta accumulation.
        index: u32,
        id: String,
        name: String,
        /// Accumulated JSON arguments (may arrive across multiple deltas).
        arguments: String,
    },
    /// The model hit its output-token limit; pending arguments may be cut.
    MaxTokens,
    /// Final usage statistics.
    Usage { input_tokens: u32, output_tokens: u32 },
    /// The stream finished normally.
    Done,
    /// A recoverable error (non-fatal warning).
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
