// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming client for OpenAI-compatible `/chat/completions` servers.
//!
//! Local servers (Ollama, llama.cpp, vLLM, LM Studio) and most hosted
//! gateways speak the same wire format: JSON request, SSE `data:` frames in
//! response, content deltas under `choices[].delta.content` and native tool
//! calls under `choices[].delta.tool_calls` with incremental `arguments`
//! strings.  `GET <base>/models` returns `{"data": [{"id": ...}]}`.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use orca_config::ModelConfig;

use crate::{client::ResponseStream, CompletionRequest, Message, ResponseEvent, Role};

/// OpenAI-compatible chat-completions client.
pub struct OpenAiClient {
    model: String,
    /// Pre-resolved API key; local servers typically have none.
    api_key: Option<String>,
    chat_url: String,
    models_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Build a client from config.  `base_url` ends before `/chat/completions`.
    pub fn from_config(cfg: &ModelConfig) -> Self {
        let base = cfg.base_url.trim_end_matches('/');
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| cfg.api_key_env.as_deref().and_then(|e| std::env::var(e).ok()));
        Self {
            model: cfg.name.clone(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            models_url: format!("{base}/models"),
            max_tokens: cfg.max_tokens.unwrap_or(4096),
            temperature: cfg.temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_wire_messages(&req.messages, req.native_tool_results);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": req.stream,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if req.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.model,
            tool_count = tools.len(),
            message_count = messages.len(),
            "sending completion request"
        );

        let mut http_req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let resp = http_req
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.chat_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("chat completion error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across multiple TCP packets.  Maintain a
        // line buffer across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }

    /// List model ids via `GET /models`.
    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let mut req = self.client.get(&self.models_url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.models_url))?;
        if !resp.status().is_success() {
            bail!("model listing error {}", resp.status());
        }
        let body: Value = resp.json().await.context("parsing model list")?;
        let mut ids: Vec<String> = body["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .filter_map(|item| item["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}

// ─── Wire translation ─────────────────────────────────────────────────────────

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert conversation messages into the OpenAI wire-format JSON array.
///
/// An assistant message that mixes a text span with function calls becomes a
/// single assistant object with `content` plus a `tool_calls` array, as the
/// parallel-tool-call contract requires.  Function results become tool-role
/// messages when `native` is set; otherwise they are materialised as
/// user-role text of the form `[Tool result for <name>]: <body>` so that
/// backends without native tool-result support still see the outputs.  One
/// request never mixes the two encodings.
///
/// Extracted as a free function so it can be unit-tested without HTTP.
pub(crate) fn build_wire_messages(messages: &[Message], native: bool) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len());

    for m in messages {
        let text = m.text();
        let calls: Vec<&crate::FunctionCall> = m.calls().collect();
        let results: Vec<&crate::FunctionResult> = m.results().collect();

        if !calls.is_empty() {
            let tool_calls: Vec<Value> = calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.call_id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.args_json(),
                        }
                    })
                })
                .collect();
            let mut obj = json!({ "role": "assistant", "tool_calls": tool_calls });
            if !text.is_empty() {
                obj["content"] = json!(text);
            }
            wire.push(obj);
            continue;
        }

        if !results.is_empty() {
            for r in results {
                if native {
                    wire.push(json!({
                        "role": "tool",
                        "tool_call_id": r.call_id,
                        "content": r.result,
                    }));
                } else {
                    wire.push(json!({
                        "role": "user",
                        "content": format!("[Tool result for {}]: {}", r.name, r.result),
                    }));
                }
            }
            continue;
        }

        wire.push(json!({ "role": role_str(m.role), "content": text }));
    }

    wire
}

// ─── SSE parsing ──────────────────────────────────────────────────────────────

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by the
/// next TCP chunk — a single SSE event may span several packets.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(Ok(parse_sse_chunk(&v)))
}

fn parse_sse_chunk(v: &Value) -> ResponseEvent {
    // Usage-only chunk (emitted when stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return ResponseEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };
    }

    let choice = &v["choices"][0];

    // finish_reason=length means the model hit its output-token limit; any
    // pending tool-call arguments are truncated.
    if choice["finish_reason"].as_str() == Some("length") {
        return ResponseEvent::MaxTokens;
    }

    let delta = &choice["delta"];

    // Native tool-call delta.  Each SSE chunk carries one tool-call delta in
    // practice; the "index" field routes accumulation for parallel calls.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return ResponseEvent::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        };
    }

    // Reasoning delta (llama.cpp `reasoning_content`, some gateways `reasoning`).
    let thinking = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(t) = thinking {
        if !t.is_empty() {
            return ResponseEvent::ThinkingDelta(t.to_string());
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return ResponseEvent::TextDelta(text.to_string());
    }

    ResponseEvent::TextDelta(String::new())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
