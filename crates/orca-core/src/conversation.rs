// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use orca_model::{ContentItem, FunctionCall, Message, Role};

/// Ordered message log for one session.
///
/// Append-only in the happy path; compaction, head truncation, and rewind
/// are the three structural operations.  The system prompt is held
/// separately and prepended on each request — it is not a turn.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    chars_per_token: f32,
}

impl Conversation {
    pub fn new(chars_per_token: f32) -> Self {
        Self { system_prompt: None, messages: Vec::new(), chars_per_token }
    }

    pub fn with_system(chars_per_token: f32, system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            messages: Vec::new(),
            chars_per_token,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Append a function result, paired to its call by id.
    pub fn push_tool_result(&mut self, call_id: &str, name: &str, result: &str) {
        self.messages.push(Message::tool_result(call_id, name, result));
    }

    /// Cheap token proxy over the system prompt plus all messages.
    pub fn estimate_tokens(&self) -> usize {
        let system = self
            .system_prompt
            .as_ref()
            .map(|s| (s.len() as f32 / self.chars_per_token) as usize)
            .unwrap_or(0);
        system
            + self
                .messages
                .iter()
                .map(|m| m.approx_tokens(self.chars_per_token))
                .sum::<usize>()
    }

    /// Drop messages from the head until the estimate fits `max`, always
    /// keeping at least the last two messages.  Returns the number dropped.
    pub fn truncate_to_fit(&mut self, max: usize) -> usize {
        let mut dropped = 0;
        while self.estimate_tokens() > max && self.messages.len() > 2 {
            self.messages.remove(0);
            dropped += 1;
        }
        dropped
    }

    /// Replace everything before the n-th-from-last user message with a
    /// single `[Conversation summary]` user message.  Returns the number of
    /// messages removed.
    pub fn compact_with_summary(&mut self, summary: &str, preserve_last_n: usize) -> usize {
        let Some(cut) = self.nth_last_user_index(preserve_last_n) else {
            return 0;
        };
        if cut == 0 {
            return 0;
        }
        let tail = self.messages.split_off(cut);
        let removed = self.messages.len();
        self.messages = Vec::with_capacity(tail.len() + 1);
        self.messages
            .push(Message::user(format!("[Conversation summary]\n{summary}")));
        self.messages.extend(tail);
        removed
    }

    /// The messages that `compact_with_summary(_, n)` would remove: everything
    /// before the n-th-from-last user message.
    pub fn prefix_before_preserved(&self, preserve_last_n: usize) -> &[Message] {
        match self.nth_last_user_index(preserve_last_n) {
            Some(cut) => &self.messages[..cut],
            None => &[],
        }
    }

    /// Index of the n-th-from-last user message (1-based from the tail).
    fn nth_last_user_index(&self, n: usize) -> Option<usize> {
        if n == 0 {
            return Some(self.messages.len());
        }
        let mut seen = 0;
        for (i, m) in self.messages.iter().enumerate().rev() {
            if m.role == Role::User {
                seen += 1;
                if seen == n {
                    return Some(i);
                }
            }
        }
        // Fewer than n user messages: nothing to compact away.
        None
    }

    /// Pop `k` turns from the tail, where a turn is one trailing run of
    /// non-user messages plus its preceding user message.  Returns the
    /// number of messages removed.
    pub fn remove_last_turns(&mut self, k: usize) -> usize {
        let mut removed = 0;
        for _ in 0..k {
            // Trailing non-user run.
            while self
                .messages
                .last()
                .is_some_and(|m| m.role != Role::User)
            {
                self.messages.pop();
                removed += 1;
            }
            // The user message that started the turn.
            if self.messages.last().is_some_and(|m| m.role == Role::User) {
                self.messages.pop();
                removed += 1;
            }
        }
        removed
    }

    /// Function calls in assistant messages that have no matching result.
    /// After a completed, cancelled, or budget-exceeded run this must be
    /// empty — the loop fills synthetic results before returning.
    pub fn dangling_calls(&self) -> Vec<FunctionCall> {
        let mut answered = std::collections::HashSet::new();
        for m in &self.messages {
            for r in m.results() {
                answered.insert(r.call_id.clone());
            }
        }
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.calls())
            .filter(|c| !answered.contains(&c.call_id))
            .cloned()
            .collect()
    }

    /// Text of the last assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .filter(|t| !t.is_empty())
    }

    /// The first user message's text, used for session titles.
    pub fn first_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
    }

    /// Messages with the system prompt prepended, ready for a request.
    pub fn request_messages(&self) -> Vec<Message> {
        let mut msgs = Vec::with_capacity(self.messages.len() + 1);
        if let Some(sys) = &self.system_prompt {
            msgs.push(Message::system(sys.clone()));
        }
        msgs.extend(self.messages.iter().cloned());
        msgs
    }

    pub fn chars_per_token(&self) -> f32 {
        self.chars_per_token
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
