// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// Risk classification controlling the permission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskTier {
    /// No side effects.
    ReadOnly,
    /// Side effects that are reversible (checkpointed writes, process spawn).
    Moderate,
    /// Potentially destructive.
    Dangerous,
}

/// How a tool call ended.  Every failure mode maps onto this envelope; the
/// engine never relies on unwinding for tool-level control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Ok,
    Error,
    /// Refused by the permission gate.
    Denied,
    /// Recorded as a planned step in plan mode; not executed.
    PlanDeferred,
    /// A pre-hook exited non-zero.
    HookBlocked,
    /// The turn was cancelled while this call was pending or running.
    Cancelled,
}

/// The uniform result envelope for every tool call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub status: ToolStatus,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), status: ToolStatus::Ok }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), status: ToolStatus::Error }
    }

    pub fn denied(call_id: impl Into<String>, tool: &str) -> Self {
        Self {
            call_id: call_id.into(),
            content: format!("Permission denied for tool '{tool}'"),
            status: ToolStatus::Denied,
        }
    }

    pub fn plan_deferred(call_id: impl Into<String>, tool: &str) -> Self {
        Self {
            call_id: call_id.into(),
            content: format!(
                "Recorded '{tool}' as a planned step (plan mode); it was not executed"
            ),
            status: ToolStatus::PlanDeferred,
        }
    }

    pub fn hook_blocked(call_id: impl Into<String>, tool: &str, code: i32) -> Self {
        Self {
            call_id: call_id.into(),
            content: format!("Tool '{tool}' blocked by hook (exit code {code})"),
            status: ToolStatus::HookBlocked,
        }
    }

    pub fn cancelled(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: "Cancelled by user".into(),
            status: ToolStatus::Cancelled,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status != ToolStatus::Ok
    }
}

/// Receives incremental output lines from a streaming-capable tool.
pub type OutputSink = mpsc::Sender<String>;

/// Trait that every built-in tool implements.  Tools hold no per-call state;
/// everything a call needs flows through its arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn risk(&self) -> RiskTier;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;

    /// Files this call will mutate.  The engine snapshots each one before
    /// the tool runs; read-only tools return the default empty list.
    fn mutation_targets(&self, _args: &Value) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Tools that can forward output while running override this.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Execute the tool.  Failures are wrapped in [`ToolResult::err`].
    async fn execute(&self, call: &ToolCall) -> ToolResult;

    /// Streaming execution; `sink` receives output chunks as they appear.
    /// The default ignores the sink and runs buffered.
    async fn execute_streaming(&self, call: &ToolCall, _sink: OutputSink) -> ToolResult {
        self.execute(call).await
    }
}

// ─── Lenient argument extraction ──────────────────────────────────────────────
//
// Models frequently send numbers as strings and booleans as "true"/"false".
// Per-tool parameter extraction shares these coercions so each tool stays a
// one-liner per argument.

/// String argument; numbers and booleans are stringified.
pub fn arg_str(args: &Value, key: &str) -> Option<String> {
    match args.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer argument; numeric strings are parsed.
pub fn arg_u64(args: &Value, key: &str) -> Option<u64> {
    match args.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean argument; accepts "true"/"false" strings and 0/1 numbers.
pub fn arg_bool(args: &Value, key: &str) -> Option<bool> {
    match args.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().map(|v| v != 0),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
