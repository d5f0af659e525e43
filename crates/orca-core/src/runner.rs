// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent loop: drives turns to a fixed point under an iteration budget,
//! a wall clock, context-pressure compaction, and cancellation.

use std::time::{Duration, Instant};

use orca_model::{ContentItem, Message};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::conversation::Conversation;
use crate::engine::TurnEngine;
use crate::events::AgentEvent;
use crate::parser;
use crate::prompts;

/// Synthetic assistant message recorded when a budget runs out.
pub const BUDGET_EXHAUSTED_MESSAGE: &str =
    "Agent reached maximum iterations without completing.";

/// How one agent loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model finished with a plain-text answer.
    Completed,
    Cancelled,
    /// The iteration or wall-clock budget ran out.
    BudgetExhausted,
}

pub struct LoopRunner {
    engine: TurnEngine,
    max_iterations: u32,
    compaction_threshold: f32,
    preserve_recent: usize,
    context_window: usize,
    loop_timeout: Option<Duration>,
    /// Registered tool names, for prose-nudge detection.
    tool_names: Vec<String>,
    events: mpsc::Sender<AgentEvent>,
}

impl LoopRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: TurnEngine,
        max_iterations: u32,
        compaction_threshold: f32,
        preserve_recent: usize,
        context_window: usize,
        loop_timeout: Option<Duration>,
        tool_names: Vec<String>,
        events: mpsc::Sender<AgentEvent>,
    ) -> Self {
        Self {
            engine,
            max_iterations,
            compaction_threshold,
            preserve_recent,
            context_window,
            loop_timeout,
            tool_names,
            events,
        }
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TurnEngine {
        &mut self.engine
    }

    /// Drive turns until the model stops calling tools, a budget runs out,
    /// or cancellation fires.  Whatever the exit path, every assistant
    /// function-call in the conversation ends up with a matching result.
    pub async fn run(
        &mut self,
        convo: &mut Conversation,
        cancel: &CancelToken,
    ) -> anyhow::Result<LoopOutcome> {
        let started = Instant::now();
        let mut nudge_sent = false;

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Ok(self.finish_cancelled(convo).await);
            }
            if let Some(cap) = self.loop_timeout {
                if started.elapsed() >= cap {
                    warn!(?cap, "loop wall-clock budget exhausted");
                    return Ok(self.finish_exhausted(convo).await);
                }
            }

            self.maybe_compact(convo, cancel).await;

            debug!(iteration, "running agent turn");
            let outcome = self.engine.run_turn(convo, cancel).await?;

            if cancel.is_cancelled() {
                return Ok(self.finish_cancelled(convo).await);
            }

            if outcome.terminal {
                // The model answered in prose.  If it described a tool action
                // instead of calling one, nudge it back onto the protocol —
                // once per request, so an intentional final answer that
                // happens to mention a tool cannot loop forever.
                if !nudge_sent
                    && !outcome.text.is_empty()
                    && parser::describes_tool_usage(&outcome.text, &self.tool_names)
                {
                    debug!("terminal turn described tool usage; sending nudge");
                    convo.push(Message::user(prompts::TOOL_NUDGE));
                    nudge_sent = true;
                    continue;
                }
                let _ = self.events.send(AgentEvent::TurnComplete).await;
                return Ok(LoopOutcome::Completed);
            }
        }

        warn!(max = self.max_iterations, "iteration budget exhausted");
        Ok(self.finish_exhausted(convo).await)
    }

    /// Compact when the estimate crosses the threshold fraction of the
    /// context window: summarise everything older than the preserved tail
    /// in a tool-free turn and splice the summary in.
    async fn maybe_compact(&mut self, convo: &mut Conversation, cancel: &CancelToken) {
        if self.context_window == 0 {
            return;
        }
        let estimate = convo.estimate_tokens();
        if (estimate as f32) / (self.context_window as f32) < self.compaction_threshold {
            return;
        }
        let old = convo.prefix_before_preserved(self.preserve_recent);
        if old.is_empty() {
            return;
        }
        let history = serialize_history(old);

        match self.engine.summarize(&history, cancel).await {
            Ok(summary) if !summary.is_empty() => {
                let removed = convo.compact_with_summary(&summary, self.preserve_recent);
                let after = convo.estimate_tokens();
                debug!(removed, before = estimate, after, "compacted conversation");
                let _ = self
                    .events
                    .send(AgentEvent::ContextCompacted {
                        tokens_before: estimate,
                        tokens_after: after,
                    })
                    .await;
            }
            Ok(_) => {
                // An empty summary would erase history for nothing; fall back
                // to head truncation which always succeeds.
                warn!("summariser returned empty text; truncating head instead");
                let max = (self.context_window as f32 * self.compaction_threshold) as usize;
                convo.truncate_to_fit(max);
            }
            Err(e) => {
                warn!(error = %e, "compaction model call failed; truncating head instead");
                let max = (self.context_window as f32 * self.compaction_threshold) as usize;
                convo.truncate_to_fit(max);
            }
        }
    }

    async fn finish_cancelled(&self, convo: &mut Conversation) -> LoopOutcome {
        fill_dangling_calls(convo);
        let _ = self
            .events
            .send(AgentEvent::Aborted {
                partial_text: convo.last_assistant_text().unwrap_or_default(),
            })
            .await;
        LoopOutcome::Cancelled
    }

    async fn finish_exhausted(&self, convo: &mut Conversation) -> LoopOutcome {
        fill_dangling_calls(convo);
        convo.push(Message::assistant(BUDGET_EXHAUSTED_MESSAGE));
        let _ = self.events.send(AgentEvent::TurnComplete).await;
        LoopOutcome::BudgetExhausted
    }
}

/// Pair every dangling assistant function-call with a synthetic cancelled
/// result, so the conversation is valid for storage and for the next request.
pub fn fill_dangling_calls(convo: &mut Conversation) {
    for call in convo.dangling_calls() {
        convo.push_tool_result(&call.call_id, &call.name, "Cancelled by user");
    }
}

/// Render messages as plain text for the summarisation prompt.
pub fn serialize_history(messages: &[Message]) -> String {
    let mut out = String::new();
    for m in messages {
        let role = format!("{:?}", m.role).to_lowercase();
        for item in &m.items {
            match item {
                ContentItem::Text { text } if !text.is_empty() => {
                    out.push_str(&format!("[{role}] {text}\n"));
                }
                ContentItem::Call(c) => {
                    out.push_str(&format!("[{role}] called {}({})\n", c.name, c.args_json()));
                }
                ContentItem::Result(r) => {
                    out.push_str(&format!("[tool {}] {}\n", r.name, r.result));
                }
                _ => {}
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
