// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use orca_tools::{tool::arg_str, RiskTier, Tool, ToolCall, ToolResult};

use crate::cancel::CancelToken;
use crate::orchestrator::{SubAgentOrchestrator, SubAgentStatus};

const MAX_DEPTH: usize = 3;

/// Exposes the sub-agent orchestrator to the model.
///
/// Registered into the main registry after the orchestrator exists; the
/// orchestrator's registry is wired back afterwards (the one circular seam
/// in the system).  A depth counter caps nested delegation.
pub struct TaskTool {
    orchestrator: Arc<SubAgentOrchestrator>,
    depth: Arc<AtomicUsize>,
    cancel: CancelToken,
}

impl TaskTool {
    pub fn new(orchestrator: Arc<SubAgentOrchestrator>, cancel: CancelToken) -> Self {
        Self { orchestrator, depth: Arc::new(AtomicUsize::new(0)), cancel }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn a specialist sub-agent for a focused task and return its final \
         report. Agent types: explore (read-only search), plan (read-only + \
         web), bash (shell work), review (read-only code review), general \
         (all tools). Pass several entries in 'tasks' to fan out in parallel. \
         Maximum nesting depth is 3."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Moderate
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "Task description for the sub-agent" },
                "agent_type": {
                    "type": "string",
                    "description": "Agent type (default: general)"
                },
                "tasks": {
                    "type": "array",
                    "description": "Multiple tasks to run in parallel; overrides 'task'",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task": { "type": "string" },
                            "agent_type": { "type": "string" }
                        },
                        "required": ["task"]
                    }
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let depth = self.depth.load(Ordering::Relaxed);
        if depth >= MAX_DEPTH {
            return ToolResult::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }
        self.depth.fetch_add(1, Ordering::Relaxed);
        let result = self.run(call).await;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

impl TaskTool {
    async fn run(&self, call: &ToolCall) -> ToolResult {
        // Parallel fan-out form.
        if let Some(list) = call.args.get("tasks").and_then(|v| v.as_array()) {
            let tasks: Vec<(String, Option<String>)> = list
                .iter()
                .filter_map(|item| {
                    arg_str(item, "task").map(|t| (t, arg_str(item, "agent_type")))
                })
                .collect();
            if tasks.is_empty() {
                return ToolResult::err(&call.id, "'tasks' has no entries with a 'task' field");
            }
            debug!(count = tasks.len(), "task tool: parallel fan-out");
            let results = self.orchestrator.spawn_parallel(tasks, &self.cancel).await;

            let mut sections: Vec<String> = results
                .values()
                .map(|r| format!("### {} [{:?}]\n{}", r.id, r.status, r.output))
                .collect();
            sections.sort();
            let any_failed =
                results.values().any(|r| r.status == SubAgentStatus::Failed);
            let body = sections.join("\n\n");
            return if any_failed {
                ToolResult::err(&call.id, body)
            } else {
                ToolResult::ok(&call.id, body)
            };
        }

        // Single-spawn form.
        let Some(task) = arg_str(&call.args, "task") else {
            return ToolResult::err(&call.id, "missing 'task' argument");
        };
        let agent_type = arg_str(&call.args, "agent_type");
        debug!(agent_type = agent_type.as_deref().unwrap_or("general"), "task tool: spawn");
        let result = self
            .orchestrator
            .spawn(&task, agent_type.as_deref(), &self.cancel)
            .await;
        match result.status {
            SubAgentStatus::Completed => ToolResult::ok(&call.id, result.output),
            SubAgentStatus::Cancelled => ToolResult::cancelled(&call.id),
            _ => ToolResult::err(&call.id, result.output),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use orca_config::ToolsConfig;
    use orca_model::{ModelClient, ScriptedMockClient};
    use orca_tools::{
        CheckpointStore, HookRunner, MemoryStore, PermissionGate, ProcessSupervisor, RateLimiter,
        ToolRegistry,
    };

    use crate::orchestrator::{AgentTypeRegistry, SubAgentLimits};

    fn wired_task_tool(model: Arc<dyn ModelClient>, dir: &Path) -> TaskTool {
        let supervisor = ProcessSupervisor::new();
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let memory = Arc::new(MemoryStore::new(None, dir.join("memory"), 10));
        let base = orca_tools::builtin_registry(supervisor, limiter, memory, 10).unwrap();
        let gate = Arc::new(PermissionGate::from_config(&ToolsConfig {
            auto_approve_all: true,
            ..ToolsConfig::default()
        }));
        let orch = Arc::new(SubAgentOrchestrator::new(
            model,
            gate,
            Arc::new(HookRunner::new(Default::default())),
            Arc::new(CheckpointStore::new(dir.join("ckpt"))),
            AgentTypeRegistry::builtin_only(),
            SubAgentLimits::default(),
            dir.to_path_buf(),
        ));
        let tool = TaskTool::new(Arc::clone(&orch), CancelToken::never());
        // The real wiring also registers the task tool into `base`; these
        // tests only exercise delegation, so the plain registry suffices.
        let main: Arc<ToolRegistry> = Arc::new(base);
        orch.wire_registry(main);
        tool
    }

    #[tokio::test]
    async fn single_task_returns_sub_agent_output() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedMockClient::always_text("delegated answer"));
        let tool = wired_task_tool(model, dir.path());
        let call = ToolCall {
            id: "t".into(),
            name: "task".into(),
            args: serde_json::json!({"task": "look around", "agent_type": "explore"}),
        };
        let out = tool.execute(&call).await;
        assert!(!out.is_error());
        assert_eq!(out.content, "delegated answer");
    }

    #[tokio::test]
    async fn parallel_tasks_merge_reports() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedMockClient::new(vec![
            vec![
                orca_model::ResponseEvent::TextDelta("report A".into()),
                orca_model::ResponseEvent::Done,
            ],
            vec![
                orca_model::ResponseEvent::TextDelta("report B".into()),
                orca_model::ResponseEvent::Done,
            ],
        ]));
        let tool = wired_task_tool(model, dir.path());
        let call = ToolCall {
            id: "t".into(),
            name: "task".into(),
            args: serde_json::json!({
                "tasks": [
                    {"task": "first", "agent_type": "explore"},
                    {"task": "second", "agent_type": "explore"}
                ]
            }),
        };
        let out = tool.execute(&call).await;
        assert!(!out.is_error());
        assert!(out.content.contains("report A"));
        assert!(out.content.contains("report B"));
    }

    #[tokio::test]
    async fn missing_task_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedMockClient::always_text("x"));
        let tool = wired_task_tool(model, dir.path());
        let call =
            ToolCall { id: "t".into(), name: "task".into(), args: serde_json::json!({}) };
        assert!(tool.execute(&call).await.is_error());
    }
}
