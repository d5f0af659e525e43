// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;

use crate::{Tool, ToolCall, ToolResult};

/// A tool schema — mirrors orca_model::ToolSchema but keeps this crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools, keyed by canonical
/// lowercase name.  Immutable after discovery; resolution has no side
/// effects, so no lock is needed for concurrent lookups.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool under its canonical lowercase name.
    /// A duplicate name is a startup error, not a silent overwrite.
    pub fn register(&mut self, tool: impl Tool + 'static) -> anyhow::Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> anyhow::Result<()> {
        let name = tool.name().to_lowercase();
        if self.tools.contains_key(&name) {
            bail!("duplicate tool name: {name}");
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name.to_lowercase()).cloned()
    }

    /// All registered tools, sorted by name.
    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Produce schemas for all registered tools, used to seed the model's
    /// function-calling payload.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.all()
            .into_iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// A restricted registry holding only `names`, sharing the same tool
    /// instances so any post-registration wiring is preserved.  Names absent
    /// from this registry are silently dropped.
    pub fn subset(&self, names: &[String]) -> ToolRegistry {
        let mut sub = ToolRegistry::new();
        for name in names {
            if let Some(tool) = self.tools.get(&name.to_lowercase()) {
                sub.tools.insert(name.to_lowercase(), Arc::clone(tool));
            }
        }
        sub
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.resolve(&call.name) {
            Some(tool) => tool.execute(call).await,
            None => ToolResult::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::tool::{RiskTier, Tool, ToolCall, ToolResult};

    /// Minimal no-op tool for registry tests.
    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn risk(&self) -> RiskTier {
            RiskTier::ReadOnly
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall) -> ToolResult {
            ToolResult::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    #[test]
    fn register_and_resolve() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" }).unwrap();
        assert!(reg.resolve("echo").is_some());
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" }).unwrap();
        assert!(reg.resolve("Echo").is_some());
        assert!(reg.resolve("ECHO").is_some());
    }

    #[test]
    fn duplicate_name_is_an_error() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" }).unwrap();
        assert!(reg.register(EchoTool { name: "t" }).is_err());
    }

    #[test]
    fn resolve_unknown_returns_none() {
        let reg = ToolRegistry::new();
        assert!(reg.resolve("nope").is_none());
    }

    #[test]
    fn schemas_are_sorted_and_complete() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "b" }).unwrap();
        reg.register(EchoTool { name: "a" }).unwrap();
        let schemas = reg.schemas();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0].name, "a");
        assert_eq!(schemas[1].description, "echoes its input");
    }

    #[test]
    fn subset_shares_instances_and_drops_unknown() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a" }).unwrap();
        reg.register(EchoTool { name: "b" }).unwrap();
        let sub = reg.subset(&["a".into(), "missing".into()]);
        assert!(sub.resolve("a").is_some());
        assert!(sub.resolve("b").is_none());
        assert!(sub.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error_envelope() {
        let reg = ToolRegistry::new();
        let call = ToolCall { id: "x".into(), name: "missing".into(), args: json!({}) };
        let out = reg.execute(&call).await;
        assert!(out.is_error());
        assert!(out.content.contains("unknown tool"));
    }
}
