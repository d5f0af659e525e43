// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::rate_limit::RateLimiter;
use crate::tool::{arg_str, arg_u64, RiskTier, Tool, ToolCall, ToolResult};

const DEFAULT_MAX_CHARS: usize = 50_000;

/// Fetches a URL and converts it to readable text.  Outgoing requests pass
/// through the shared per-host rate limiter.
pub struct WebFetchTool {
    pub limiter: Arc<RateLimiter>,
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch content from an http/https URL and convert it to readable text.\n\
         HTML is converted to plain text, JSON is pretty-printed, anything \
         else is returned as-is.  Content is capped at 50,000 characters \
         (override with max_chars).  Read-only; no authentication."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Moderate
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to fetch (http or https)" },
                "max_chars": { "type": "integer", "description": "Maximum characters to return (default 50000)" }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(url) = arg_str(&call.args, "url") else {
            return ToolResult::err(&call.id, "missing 'url' argument");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::err(&call.id, "only http/https URLs are supported");
        }
        let max_chars =
            arg_u64(&call.args, "max_chars").unwrap_or(DEFAULT_MAX_CHARS as u64) as usize;

        debug!(url, "web_fetch tool");
        self.limiter.throttle(&url).await;

        match fetch_url(&url, max_chars).await {
            Ok(content) => ToolResult::ok(&call.id, content),
            Err(e) => ToolResult::err(&call.id, format!("fetch error: {e}")),
        }
    }
}

async fn fetch_url(url: &str, max_chars: usize) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent("orca-agent/0.4")
        .build()?;

    let response = client.get(url).send().await?;
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let body = response.text().await?;

    let content = if content_type.contains("html") {
        html_to_text(&body)
    } else if content_type.contains("json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(v) => serde_json::to_string_pretty(&v).unwrap_or(body),
            Err(_) => body,
        }
    } else {
        body
    };

    if content.len() > max_chars {
        let mut end = max_chars;
        while end > 0 && !content.is_char_boundary(end) {
            end -= 1;
        }
        Ok(format!(
            "{}...[truncated at {max_chars} chars; total {} chars]",
            &content[..end],
            content.len()
        ))
    } else {
        Ok(content)
    }
}

/// Convert HTML to plain text using html2text.
fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn html_to_text_strips_tags() {
        let html = "<html><body><h1>Hello</h1><p>World</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("<h1>"));
    }

    #[tokio::test]
    async fn non_http_url_is_rejected() {
        let t = WebFetchTool { limiter: Arc::new(RateLimiter::new(Duration::ZERO)) };
        let call = ToolCall {
            id: "c".into(),
            name: "web_fetch".into(),
            args: json!({"url": "file:///etc/passwd"}),
        };
        let out = t.execute(&call).await;
        assert!(out.is_error());
    }

    #[test]
    fn schema_requires_url() {
        let t = WebFetchTool { limiter: Arc::new(RateLimiter::new(Duration::ZERO)) };
        let schema = t.parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v.as_str() == Some("url")));
    }
}
