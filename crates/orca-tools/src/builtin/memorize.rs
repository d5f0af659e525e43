// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::MemoryStore;
use crate::tool::{arg_str, RiskTier, Tool, ToolCall, ToolResult};

/// Lets the model record a durable learning for future sessions.
pub struct MemorizeTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for MemorizeTool {
    fn name(&self) -> &str {
        "memorize"
    }

    fn description(&self) -> &str {
        "Save a short note that future sessions in this project should know: \
         build quirks, conventions, decisions.  Keep it to one paragraph."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Moderate
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note": { "type": "string", "description": "The learning to remember" }
            },
            "required": ["note"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(note) = arg_str(&call.args, "note") else {
            return ToolResult::err(&call.id, "missing 'note' argument");
        };
        match self.store.store(&note).await {
            Ok(path) => ToolResult::ok(&call.id, format!("Remembered in {}", path.display())),
            Err(e) => ToolResult::err(&call.id, format!("cannot store memory: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stores_note_via_memory_store() {
        let dir = tempfile::tempdir().unwrap();
        let t = MemorizeTool {
            store: Arc::new(MemoryStore::new(None, dir.path(), 10)),
        };
        let call = ToolCall {
            id: "c".into(),
            name: "memorize".into(),
            args: json!({"note": "tests need the fixtures dir"}),
        };
        let out = t.execute(&call).await;
        assert!(!out.is_error());
        assert!(out.content.starts_with("Remembered in "));
    }

    #[tokio::test]
    async fn empty_note_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = MemorizeTool {
            store: Arc::new(MemoryStore::new(None, dir.path(), 10)),
        };
        let call =
            ToolCall { id: "c".into(), name: "memorize".into(), args: json!({"note": "  "}) };
        assert!(t.execute(&call).await.is_error());
    }
}
