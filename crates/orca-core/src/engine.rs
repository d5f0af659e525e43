// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One streamed round-trip with the model, including the native/text
//! tool-call reconciliation and sequential tool execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use orca_config::PermissionMode;
use orca_model::{
    CompletionRequest, FunctionCall, Message, ModelClient, ResponseEvent, ToolSchema,
};
use orca_tools::{
    CheckpointStore, HookRunner, PermissionGate, PermissionVerdict, PreHookOutcome, ToolRegistry,
    ToolResult,
};

use crate::cancel::CancelToken;
use crate::conversation::Conversation;
use crate::events::AgentEvent;
use crate::parser;
use crate::prompts;

/// Result of one turn.
pub struct TurnOutcome {
    /// The model emitted no tool calls: the text is its final answer.
    pub terminal: bool,
    pub text: String,
}

/// Executes exactly one round-trip with the model.
pub struct TurnEngine {
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    gate: Arc<PermissionGate>,
    hooks: Arc<HookRunner>,
    checkpoints: Arc<CheckpointStore>,
    session_id: String,
    mode: PermissionMode,
    /// Downgrades to `false` for the rest of the loop when the backend
    /// proves unable to carry native tool calls.
    native_tools: bool,
    idle_timeout: Duration,
    events: mpsc::Sender<AgentEvent>,
    /// Counter for synthetic call ids (text-parsed calls carry none).
    call_counter: u64,
}

struct StreamedTurn {
    text: String,
    native_calls: Vec<FunctionCall>,
    cancelled: bool,
}

impl TurnEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        gate: Arc<PermissionGate>,
        hooks: Arc<HookRunner>,
        checkpoints: Arc<CheckpointStore>,
        session_id: String,
        mode: PermissionMode,
        native_tools: bool,
        idle_timeout: Duration,
        events: mpsc::Sender<AgentEvent>,
    ) -> Self {
        Self {
            model,
            tools,
            gate,
            hooks,
            checkpoints,
            session_id,
            mode,
            native_tools,
            idle_timeout,
            events,
            call_counter: 0,
        }
    }

    pub fn native_tools(&self) -> bool {
        self.native_tools
    }

    pub fn set_mode(&mut self, mode: PermissionMode) {
        self.mode = mode;
    }

    /// Run one turn: stream a response, reconcile tool calls, execute them
    /// in emission order, and append everything to the conversation.
    pub async fn run_turn(
        &mut self,
        convo: &mut Conversation,
        cancel: &CancelToken,
    ) -> anyhow::Result<TurnOutcome> {
        let mut empty_retry_done = false;
        let mut continuation_nudges = 0u32;

        let (text, calls) = loop {
            let streamed = self.stream_once(convo, self.native_tools, cancel).await?;
            if streamed.cancelled || cancel.is_cancelled() {
                let text = parser::strip_think(&streamed.text).trim().to_string();
                if !text.is_empty() {
                    convo.push(Message::assistant(&text));
                }
                let _ = self.events.send(AgentEvent::Aborted { partial_text: text.clone() }).await;
                return Ok(TurnOutcome { terminal: true, text });
            }

            // Empty-response guard: neither text nor calls arrived.  In
            // native mode, downgrade to the text protocol and retry this
            // turn once; a second empty response surfaces as a protocol
            // error that terminates the loop.
            if streamed.text.trim().is_empty() && streamed.native_calls.is_empty() {
                if empty_retry_done {
                    anyhow::bail!("model returned an empty response twice");
                }
                empty_retry_done = true;
                if self.native_tools {
                    warn!("empty native response; downgrading to text tool protocol and retrying");
                    self.downgrade_to_text(convo);
                } else {
                    warn!("empty response; retrying once");
                }
                continue;
            }

            // Native → text fallback: a function call arrived without its
            // required arguments (the backend did not surface argument
            // deltas for a tool-only response).
            if self.native_tools
                && !empty_retry_done
                && streamed.native_calls.iter().any(|c| self.required_args_missing(c))
            {
                warn!("native call missing required arguments; downgrading to text protocol");
                self.downgrade_to_text(convo);
                empty_retry_done = true;
                continue;
            }

            let text = parser::strip_think(&streamed.text).trim().to_string();
            let calls = self.collect_calls(&streamed, &text);

            // Truncation: an unclosed call at the end of the stream.  Nudge
            // the model to re-emit, at most twice.
            if calls.is_empty()
                && parser::detect_truncation(&text)
                && continuation_nudges < 2
            {
                warn!("truncated tool call detected; sending continuation nudge");
                if !text.is_empty() {
                    convo.push(Message::assistant(&text));
                }
                convo.push(Message::user(prompts::CONTINUATION_NUDGE));
                continuation_nudges += 1;
                continue;
            }

            break (text, calls);
        };

        if !text.is_empty() {
            let _ = self.events.send(AgentEvent::TextComplete(text.clone())).await;
        }
        convo.push(Message::assistant_with_calls(&text, calls.clone()));

        if calls.is_empty() {
            return Ok(TurnOutcome { terminal: true, text });
        }

        // Tool calls execute sequentially in emission order, so the model
        // observes earlier side effects before the next call.  Sub-agent
        // fan-out is the only parallel surface.
        let mut cancelled_rest = false;
        for call in &calls {
            let result = if cancelled_rest {
                ToolResult::cancelled(&call.call_id)
            } else {
                let _ = self
                    .events
                    .send(AgentEvent::ToolCallStarted {
                        call_id: call.call_id.clone(),
                        name: call.name.clone(),
                        args_json: call.args_json(),
                    })
                    .await;
                self.execute_one(call, cancel).await
            };
            let _ = self
                .events
                .send(AgentEvent::ToolCallFinished {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    output: result.content.clone(),
                    is_error: result.is_error(),
                })
                .await;
            convo.push_tool_result(&call.call_id, &call.name, &result.content);
            if cancel.is_cancelled() {
                cancelled_rest = true;
            }
        }

        Ok(TurnOutcome { terminal: false, text })
    }

    /// Tool-free single-shot turn producing a compaction summary for the
    /// given serialized history.
    pub async fn summarize(
        &mut self,
        history: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<String> {
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user(format!(
            "{}\n\n---\n\n{history}",
            prompts::COMPACTION_PROMPT
        )));
        let streamed = self.stream_once(&convo, false, cancel).await?;
        Ok(parser::strip_think(&streamed.text).trim().to_string())
    }

    /// Tool-free single-shot turn distilling a learnings paragraph for the
    /// memory store.  Returns `None` when the model judged the conversation
    /// unremarkable.
    pub async fn distill_learnings(
        &mut self,
        history: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<Option<String>> {
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user(format!(
            "{}\n\n---\n\n{history}",
            prompts::MEMORY_PROMPT
        )));
        let streamed = self.stream_once(&convo, false, cancel).await?;
        let text = parser::strip_think(&streamed.text).trim().to_string();
        if text.is_empty() || text == "NOTHING" {
            return Ok(None);
        }
        Ok(Some(text))
    }

    // ── Streaming ─────────────────────────────────────────────────────────────

    async fn stream_once(
        &self,
        convo: &Conversation,
        with_tools: bool,
        cancel: &CancelToken,
    ) -> anyhow::Result<StreamedTurn> {
        let tools: Vec<ToolSchema> = if with_tools {
            self.tools
                .schemas()
                .into_iter()
                .map(|s| ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                })
                .collect()
        } else {
            Vec::new()
        };

        let req = CompletionRequest {
            messages: convo.request_messages(),
            tools,
            stream: true,
            native_tool_results: self.native_tools,
        };
        debug!(
            message_count = req.messages.len(),
            native = self.native_tools,
            "starting model turn"
        );
        let mut stream = self.model.complete(req).await.context("model completion failed")?;

        let mut text = String::new();
        let mut was_cancelled = false;
        // Keyed by the provider's parallel-call index; argument deltas for
        // one call may arrive across many chunks.
        let mut pending: HashMap<u32, (String, String, String)> = HashMap::new();

        loop {
            // The idle watchdog resets on every received event; a silent
            // stream is aborted and handled by the empty-response guard.
            // External cancellation interrupts at the same suspension point.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => next,
            };
            let event = match next {
                Err(_) => {
                    warn!(timeout = ?self.idle_timeout, "stream idle watchdog fired");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(e).context("model stream failed"),
                Ok(Some(Ok(ev))) => ev,
            };
            match event {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    text.push_str(&delta);
                    let _ = self.events.send(AgentEvent::TextDelta(delta)).await;
                }
                ResponseEvent::ThinkingDelta(delta) => {
                    let _ = self.events.send(AgentEvent::ThinkingDelta(delta)).await;
                }
                ResponseEvent::ToolCall { index, id, name, arguments } => {
                    let entry = pending.entry(index).or_default();
                    if !id.is_empty() {
                        entry.0 = id;
                    }
                    if !name.is_empty() {
                        entry.1 = name;
                    }
                    entry.2.push_str(&arguments);
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => warn!("model stream error event: {e}"),
                _ => {}
            }
        }

        // Flush accumulated native calls in index order.  Calls with no name
        // cannot be dispatched and are dropped; empty ids get a synthetic
        // fallback so the result can still be paired.
        let mut sorted: Vec<(u32, (String, String, String))> = pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let mut native_calls = Vec::new();
        for (_, (id, name, args_buf)) in sorted {
            if name.is_empty() {
                warn!("dropping native tool call with empty name");
                continue;
            }
            let args = match serde_json::from_str::<Value>(&args_buf) {
                Ok(Value::Object(map)) => map,
                _ if args_buf.trim().is_empty() => serde_json::Map::new(),
                _ => {
                    warn!(tool = %name, "native call arguments are not valid JSON; substituting {{}}");
                    serde_json::Map::new()
                }
            };
            native_calls.push(FunctionCall { call_id: id, name, args });
        }

        Ok(StreamedTurn { text, native_calls, cancelled: was_cancelled })
    }

    // ── Call reconciliation ───────────────────────────────────────────────────

    /// Merge native calls with text-parsed calls, deduplicating by
    /// (name, canonical arguments); the native channel wins on a duplicate.
    fn collect_calls(&mut self, streamed: &StreamedTurn, text: &str) -> Vec<FunctionCall> {
        let mut calls: Vec<FunctionCall> = Vec::new();
        let mut seen: std::collections::HashSet<(String, String)> = Default::default();

        for c in &streamed.native_calls {
            let mut call = c.clone();
            call.args = self.shape_for_tool(&call.name, call.args);
            if call.call_id.is_empty() {
                call.call_id = self.next_call_id();
            }
            seen.insert((call.name.clone(), call.args_json()));
            calls.push(call);
        }

        for parsed in parser::parse_tool_calls(text) {
            let args = self.shape_for_tool(&parsed.name, parsed.args);
            let key = (
                parsed.name.clone(),
                Value::Object(args.clone()).to_string(),
            );
            if seen.contains(&key) {
                debug!(tool = %parsed.name, "dropping text call duplicated in native channel");
                continue;
            }
            seen.insert(key);
            calls.push(FunctionCall {
                call_id: self.next_call_id(),
                name: parsed.name,
                args,
            });
        }
        calls
    }

    fn shape_for_tool(
        &self,
        name: &str,
        args: serde_json::Map<String, Value>,
    ) -> serde_json::Map<String, Value> {
        match self.tools.resolve(name) {
            Some(tool) => parser::shape_arguments(args, &tool.parameters_schema()),
            None => args,
        }
    }

    fn next_call_id(&mut self) -> String {
        self.call_counter += 1;
        format!("call_{:04}", self.call_counter)
    }

    fn required_args_missing(&self, call: &FunctionCall) -> bool {
        if !call.args.is_empty() {
            return false;
        }
        let Some(tool) = self.tools.resolve(&call.name) else {
            return false;
        };
        tool.parameters_schema()
            .get("required")
            .and_then(|r| r.as_array())
            .is_some_and(|r| !r.is_empty())
    }

    /// Switch to the text tool protocol for the remainder of the loop and
    /// teach it through the system prompt.
    fn downgrade_to_text(&mut self, convo: &mut Conversation) {
        self.native_tools = false;
        let protocol = prompts::text_tool_protocol(&self.tools.schemas());
        match &mut convo.system_prompt {
            Some(sp) if !sp.contains("## Tool calling") => {
                sp.push_str("\n\n");
                sp.push_str(&protocol);
            }
            None => convo.system_prompt = Some(protocol),
            _ => {}
        }
    }

    // ── Tool execution ────────────────────────────────────────────────────────

    async fn execute_one(&self, call: &FunctionCall, cancel: &CancelToken) -> ToolResult {
        let Some(tool) = self.tools.resolve(&call.name) else {
            return ToolResult::err(&call.call_id, format!("unknown tool: {}", call.name));
        };
        let args = Value::Object(call.args.clone());
        let args_json = call.args_json();

        // Checkpoint every file this call will mutate, before the tool (and
        // before any of its internal retries) can touch it.
        for path in tool.mutation_targets(&args) {
            if let Err(e) = self.checkpoints.snapshot(&path, &self.session_id).await {
                return ToolResult::err(
                    &call.call_id,
                    format!("checkpoint failed for {}: {e}", path.display()),
                );
            }
        }

        match self.gate.check(&call.name, &args, self.mode, tool.risk()).await {
            PermissionVerdict::Denied => {
                return ToolResult::denied(&call.call_id, &call.name);
            }
            PermissionVerdict::PlanDeferred => {
                return ToolResult::plan_deferred(&call.call_id, &call.name);
            }
            PermissionVerdict::Approved => {}
        }

        match self.hooks.run_pre(&call.name, &args_json).await {
            PreHookOutcome::Blocked { exit_code } => {
                return ToolResult::hook_blocked(&call.call_id, &call.name, exit_code);
            }
            PreHookOutcome::Allowed => {}
        }

        let tc = orca_tools::ToolCall {
            id: call.call_id.clone(),
            name: call.name.clone(),
            args,
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::cancelled(&call.call_id),
            r = self.invoke(&tool, &tc) => r,
        };

        self.hooks
            .run_post(&call.name, &args_json, &result.content, result.is_error())
            .await;
        result
    }

    async fn invoke(
        &self,
        tool: &Arc<dyn orca_tools::Tool>,
        tc: &orca_tools::ToolCall,
    ) -> ToolResult {
        if !tool.supports_streaming() {
            return tool.execute(tc).await;
        }
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let events = self.events.clone();
        let call_id = tc.id.clone();
        let forward = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let _ = events
                    .send(AgentEvent::ToolOutputChunk { call_id: call_id.clone(), line })
                    .await;
            }
        });
        let result = tool.execute_streaming(tc, tx).await;
        let _ = forward.await;
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use orca_config::ToolsConfig;
    use orca_model::ScriptedMockClient;
    use orca_tools::{MemoryStore, ProcessSupervisor, RateLimiter};

    fn engine_with(
        model: Arc<dyn ModelClient>,
        native: bool,
        auto_approve_all: bool,
        dir: &std::path::Path,
    ) -> (TurnEngine, mpsc::Receiver<AgentEvent>) {
        let supervisor = ProcessSupervisor::new();
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let memory = Arc::new(MemoryStore::new(None, dir.join("memory"), 10));
        let registry = Arc::new(
            orca_tools::builtin_registry(supervisor, limiter, memory, 10).unwrap(),
        );
        let gate = Arc::new(PermissionGate::from_config(&ToolsConfig {
            auto_approve_all,
            ..ToolsConfig::default()
        }));
        let hooks = Arc::new(HookRunner::new(Default::default()));
        let checkpoints = Arc::new(CheckpointStore::new(dir.join("ckpt")));
        let (tx, rx) = mpsc::channel(256);
        let engine = TurnEngine::new(
            model,
            registry,
            gate,
            hooks,
            checkpoints,
            "sess0001".into(),
            PermissionMode::Normal,
            native,
            Duration::from_secs(5),
            tx,
        );
        (engine, rx)
    }

    #[tokio::test]
    async fn text_only_turn_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedMockClient::always_text("Hi!"));
        let (mut engine, _rx) = engine_with(model, true, false, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("Say hi"));
        let outcome = engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();
        assert!(outcome.terminal);
        assert_eq!(outcome.text, "Hi!");
        assert_eq!(convo.messages.len(), 2);
        assert_eq!(convo.last_assistant_text().as_deref(), Some("Hi!"));
    }

    #[tokio::test]
    async fn native_tool_call_executes_and_pairs_result() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("temp.txt");
        std::fs::write(&target, "12345").unwrap();
        let model = Arc::new(ScriptedMockClient::tool_then_text(
            "c1",
            "delete_file",
            format!(r#"{{"path": "{}"}}"#, target.display()),
            "done",
        ));
        let (mut engine, _rx) = engine_with(model, true, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("Delete temp.txt"));

        let outcome = engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();
        assert!(!outcome.terminal);
        assert!(!target.exists());
        // Paired result with the same id.
        assert!(convo.dangling_calls().is_empty());
        let result = convo.messages.last().unwrap().results().next().unwrap().clone();
        assert_eq!(result.call_id, "c1");
        assert!(result.result.starts_with("Deleted: "));
    }

    #[tokio::test]
    async fn checkpoint_taken_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("temp.txt");
        std::fs::write(&target, "12345").unwrap();
        let model = Arc::new(ScriptedMockClient::tool_then_text(
            "c1",
            "delete_file",
            format!(r#"{{"path": "{}"}}"#, target.display()),
            "done",
        ));
        let (mut engine, _rx) = engine_with(model, true, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("Delete temp.txt"));
        engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();

        // One .bak file exists under the session's checkpoint dir.
        let session_dir = dir.path().join("ckpt/sess0001");
        let baks: Vec<_> = std::fs::read_dir(&session_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "bak"))
            .collect();
        assert_eq!(baks.len(), 1);
    }

    #[tokio::test]
    async fn text_tagged_call_is_parsed_and_executed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("foo.txt");
        let tagged = format!(
            r#"<tool_call>{{"name":"write_file","arguments":{{"path":"{}","content":"bar"}}}}</tool_call>"#,
            target.display()
        );
        let model = Arc::new(ScriptedMockClient::new(vec![vec![
            ResponseEvent::TextDelta(tagged),
            ResponseEvent::Done,
        ]]));
        let (mut engine, _rx) = engine_with(model, false, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("Create foo.txt containing bar"));

        let outcome = engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();
        assert!(!outcome.terminal);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "bar");
    }

    #[tokio::test]
    async fn duplicate_native_and_text_call_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let args = format!(r#"{{"path":"{}","content":"x"}}"#, target.display());
        let model = Arc::new(ScriptedMockClient::new(vec![vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: "c1".into(),
                name: "write_file".into(),
                arguments: args.clone(),
            },
            ResponseEvent::TextDelta(format!(
                r#"<tool_call>{{"name":"write_file","arguments":{args}}}</tool_call>"#
            )),
            ResponseEvent::Done,
        ]]));
        let (mut engine, _rx) = engine_with(model, true, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("write it"));
        engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();

        let calls: usize = convo.messages.iter().map(|m| m.calls().count()).sum();
        assert_eq!(calls, 1, "the duplicated call must be deduplicated");
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedMockClient::tool_then_text(
            "c1",
            "not_a_tool",
            "{\"x\": 1}",
            "ok",
        ));
        let (mut engine, _rx) = engine_with(model, true, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("go"));
        engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();
        let result = convo.messages.last().unwrap().results().next().unwrap().clone();
        assert!(result.result.contains("unknown tool"));
    }

    #[tokio::test]
    async fn empty_native_response_downgrades_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedMockClient::new(vec![
            vec![ResponseEvent::Done], // empty native response
            vec![ResponseEvent::TextDelta("recovered".into()), ResponseEvent::Done],
        ]));
        let requests = model.requests.clone();
        let (mut engine, _rx) = engine_with(model, true, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("hello"));

        let outcome = engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();
        assert!(outcome.terminal);
        assert_eq!(outcome.text, "recovered");
        assert!(!engine.native_tools(), "engine must stay downgraded");
        // The retry request carried no native tool schemas.
        let reqs = requests.lock().unwrap();
        assert_eq!(reqs.len(), 2);
        assert!(!reqs[0].tools.is_empty());
        assert!(reqs[1].tools.is_empty());
        // The text protocol was injected into the system prompt.
        assert!(convo.system_prompt.as_ref().unwrap().contains("## Tool calling"));
    }

    #[tokio::test]
    async fn double_empty_response_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedMockClient::new(vec![
            vec![ResponseEvent::Done],
            vec![ResponseEvent::Done],
        ]));
        let (mut engine, _rx) = engine_with(model, true, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("hello"));
        assert!(engine.run_turn(&mut convo, &CancelToken::never()).await.is_err());
    }

    #[tokio::test]
    async fn truncated_call_gets_continuation_nudge() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("foo.txt");
        let complete = format!(
            r#"<tool_call>{{"name":"write_file","arguments":{{"path":"{}","content":"bar"}}}}</tool_call>"#,
            target.display()
        );
        let model = Arc::new(ScriptedMockClient::new(vec![
            vec![
                ResponseEvent::TextDelta(
                    r#"<tool_call>{"name":"write_file","arguments":{"path":"#.into(),
                ),
                ResponseEvent::Done,
            ],
            vec![ResponseEvent::TextDelta(complete), ResponseEvent::Done],
        ]));
        let (mut engine, _rx) = engine_with(model, false, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("create it"));

        let outcome = engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();
        assert!(!outcome.terminal);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "bar");
        // The continuation nudge is part of the conversation.
        assert!(convo
            .messages
            .iter()
            .any(|m| m.text().contains("cut off")));
    }

    #[tokio::test]
    async fn plan_mode_defers_mutating_call() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f.txt");
        let model = Arc::new(ScriptedMockClient::tool_then_text(
            "c1",
            "write_file",
            format!(r#"{{"path":"{}","content":"x"}}"#, target.display()),
            "ok",
        ));
        let (mut engine, _rx) = engine_with(model, true, true, dir.path());
        engine.set_mode(PermissionMode::Plan);
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("write"));
        engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();

        assert!(!target.exists(), "plan mode must not execute the tool");
        let result = convo.messages.last().unwrap().results().next().unwrap().clone();
        assert!(result.result.contains("planned step"));
    }

    #[tokio::test]
    async fn alias_arguments_are_shaped_before_execution() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("aliased.txt");
        let model = Arc::new(ScriptedMockClient::tool_then_text(
            "c1",
            "write_file",
            format!(r#"{{"file_path":"{}","content":"y"}}"#, target.display()),
            "ok",
        ));
        let (mut engine, _rx) = engine_with(model, true, true, dir.path());
        let mut convo = Conversation::new(3.5);
        convo.push(Message::user("write"));
        engine.run_turn(&mut convo, &CancelToken::never()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "y");
    }
}
