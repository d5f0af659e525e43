// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{client::ResponseStream, CompletionRequest, ResponseEvent};

/// A pre-scripted mock client.  Each call to `complete` pops the next
/// response script from the front of the queue, so tests can specify exact
/// event sequences — including tool calls — without network access.
pub struct ScriptedMockClient {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// Every `CompletionRequest` seen by this client, in call order.
    /// Written on each `complete()` so tests can inspect what was sent.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedMockClient {
    /// Build a client from response scripts.  The outer `Vec` is the ordered
    /// list of calls; the inner `Vec` is the event sequence for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: client that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            ResponseEvent::TextDelta(r),
            ResponseEvent::Usage { input_tokens: 5, output_tokens: 5 },
            ResponseEvent::Done,
        ]])
    }

    /// Convenience: client that emits a native tool call, then a text reply
    /// on the following turn.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::ToolCall {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                ResponseEvent::Done,
            ],
            vec![ResponseEvent::TextDelta(final_text.into()), ResponseEvent::Done],
        ])
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl crate::ModelClient for ScriptedMockClient {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.requests.lock().unwrap().push(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Out of scripts: behave like a model that has nothing more
                // to say, so loop tests terminate instead of erroring.
                vec![ResponseEvent::Done]
            } else {
                scripts.remove(0)
            }
        };
        let events: Vec<anyhow::Result<ResponseEvent>> =
            script.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["mock-model".into()])
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelClient;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripts_pop_in_order() {
        let mock = ScriptedMockClient::new(vec![
            vec![ResponseEvent::TextDelta("one".into()), ResponseEvent::Done],
            vec![ResponseEvent::TextDelta("two".into()), ResponseEvent::Done],
        ]);
        for expected in ["one", "two"] {
            let mut stream = mock.complete(CompletionRequest::default()).await.unwrap();
            match stream.next().await.unwrap().unwrap() {
                ResponseEvent::TextDelta(t) => assert_eq!(t, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_scripts_return_done() {
        let mock = ScriptedMockClient::new(vec![]);
        let mut stream = mock.complete(CompletionRequest::default()).await.unwrap();
        assert!(matches!(stream.next().await.unwrap().unwrap(), ResponseEvent::Done));
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let mock = ScriptedMockClient::always_text("hi");
        let req = CompletionRequest {
            messages: vec![crate::Message::user("q")],
            ..Default::default()
        };
        let _ = mock.complete(req).await.unwrap();
        let recorded = mock.requests.lock().unwrap();
        assert_eq!(recorded[0].messages[0].as_text(), Some("q"));
    }
}
