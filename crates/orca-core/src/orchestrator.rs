// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Typed specialist sub-agents with restricted tool sets.
//!
//! Built-in agent types cover the common delegation shapes (explore, plan,
//! bash, review, general); custom types are markdown files with YAML
//! frontmatter in `<project>/.orca/agents/` and `<config>/agents/`, project
//! definitions shadowing global ones.  Each spawn runs a dedicated agent
//! loop over a fresh conversation, against a subset of the main tool
//! registry that preserves all post-registration wiring.
//!
//! ## Custom definition format
//!
//! ```markdown
//! ---
//! name: security-auditor
//! description: Security review specialist
//! tools: [read_file, grep, glob_file_search]
//! ---
//!
//! You are a security auditor. Task: {{TASK}}
//! ```
//!
//! `{{TASK}}`, `{{CWD}}`, and `{{PLATFORM}}` are substituted at spawn time.
//! Tool names absent from the registry are silently dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use orca_config::PermissionMode;
use orca_model::{Message, ModelClient};
use orca_tools::{CheckpointStore, HookRunner, PermissionGate, ToolRegistry};

use crate::cancel::CancelToken;
use crate::conversation::Conversation;
use crate::engine::TurnEngine;
use crate::prompts;
use crate::runner::{LoopOutcome, LoopRunner};

// ─── Agent types ──────────────────────────────────────────────────────────────

/// A named agent specialisation: restricted tool set plus a prompt template.
#[derive(Debug, Clone)]
pub struct AgentType {
    pub name: String,
    pub description: String,
    /// `None` means unrestricted (the full registry).
    pub allowed_tools: Option<Vec<String>>,
    /// Prompt template with `{{TASK}}` / `{{CWD}}` / `{{PLATFORM}}` slots.
    pub prompt: String,
}

const READ_ONLY_TOOLS: &[&str] = &["read_file", "list_dir", "glob_file_search", "grep"];

fn builtin_types() -> Vec<AgentType> {
    let read_only: Vec<String> = READ_ONLY_TOOLS.iter().map(|s| s.to_string()).collect();
    let with = |extra: &[&str]| -> Vec<String> {
        let mut v = read_only.clone();
        v.extend(extra.iter().map(|s| s.to_string()));
        v
    };
    vec![
        AgentType {
            name: "explore".into(),
            description: "Read-only codebase exploration and search".into(),
            allowed_tools: Some(read_only.clone()),
            prompt: "You are an exploration sub-agent. Investigate the codebase \
                     read-only and report what you find, with file paths.\n\
                     Working directory: {{CWD}} ({{PLATFORM}})\n\nTask: {{TASK}}"
                .into(),
        },
        AgentType {
            name: "plan".into(),
            description: "Read-only investigation plus web research; produces a plan".into(),
            allowed_tools: Some(with(&["web_fetch"])),
            prompt: "You are a planning sub-agent. Research the task (read-only \
                     tools and web fetches) and produce a concrete step-by-step \
                     plan; do not make changes.\n\
                     Working directory: {{CWD}} ({{PLATFORM}})\n\nTask: {{TASK}}"
                .into(),
        },
        AgentType {
            name: "bash".into(),
            description: "Shell work: run commands and manage background processes".into(),
            allowed_tools: Some(with(&[
                "bash",
                "get_process_output",
                "stop_process",
                "list_processes",
            ])),
            prompt: "You are a shell sub-agent. Accomplish the task with shell \
                     commands; inspect files read-only as needed.\n\
                     Working directory: {{CWD}} ({{PLATFORM}})\n\nTask: {{TASK}}"
                .into(),
        },
        AgentType {
            name: "review".into(),
            description: "Code review over the working tree and git history (read-only)".into(),
            allowed_tools: Some(with(&["bash"])),
            prompt: "You are a code review sub-agent. Read the relevant files and \
                     use bash ONLY for read-only git commands (status, log, diff, \
                     show). Never modify anything. Report findings with file and \
                     line references.\n\
                     Working directory: {{CWD}} ({{PLATFORM}})\n\nTask: {{TASK}}"
                .into(),
        },
        AgentType {
            name: "general".into(),
            description: "Unrestricted general-purpose sub-agent".into(),
            allowed_tools: None,
            prompt: "You are a sub-agent with the full tool set. Complete the task \
                     autonomously and report the outcome.\n\
                     Working directory: {{CWD}} ({{PLATFORM}})\n\nTask: {{TASK}}"
                .into(),
        },
    ]
}

// ─── Custom definitions ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AgentFrontmatter {
    name: String,
    description: String,
    tools: Vec<String>,
}

/// Parse one agent markdown file: YAML frontmatter between `---` lines,
/// prompt template after.  Files missing required keys are skipped.
fn parse_agent_file(raw: &str, path: &Path) -> Option<AgentType> {
    let rest = raw.trim_start_matches('\n');
    let after_open = rest.strip_prefix("---")?;
    let close = after_open.find("\n---")?;
    let yaml_block = &after_open[..close];
    let body = after_open[close + 4..].trim_start_matches('\n');

    let fm: AgentFrontmatter = match serde_yaml::from_str(yaml_block) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid agent frontmatter; skipping");
            return None;
        }
    };
    Some(AgentType {
        name: fm.name,
        description: fm.description,
        allowed_tools: Some(fm.tools),
        prompt: body.to_string(),
    })
}

fn load_agent_dir(dir: &Path) -> Vec<AgentType> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut types = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().is_none_or(|x| x != "md") {
            continue;
        }
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if let Some(t) = parse_agent_file(&raw, &path) {
                debug!(name = %t.name, path = %path.display(), "loaded custom agent type");
                types.push(t);
            }
        }
    }
    types
}

/// All known agent types.  Loaded once before the loop starts; reads are
/// lock-free thereafter.
#[derive(Debug)]
pub struct AgentTypeRegistry {
    project: Vec<AgentType>,
    global: Vec<AgentType>,
    builtin: Vec<AgentType>,
}

impl AgentTypeRegistry {
    /// Discover custom types under `<project>/.orca/agents/` and
    /// `<config>/agents/`.
    pub fn load(project_root: Option<&Path>, config_dir: &Path) -> Self {
        Self {
            project: project_root
                .map(|p| load_agent_dir(&p.join(".orca/agents")))
                .unwrap_or_default(),
            global: load_agent_dir(&config_dir.join("agents")),
            builtin: builtin_types(),
        }
    }

    pub fn builtin_only() -> Self {
        Self { project: Vec::new(), global: Vec::new(), builtin: builtin_types() }
    }

    /// Resolution order: project custom, global custom, built-in.
    pub fn resolve(&self, name: &str) -> Option<&AgentType> {
        self.project
            .iter()
            .chain(&self.global)
            .chain(&self.builtin)
            .find(|t| t.name == name)
    }

    pub fn all(&self) -> Vec<&AgentType> {
        self.project.iter().chain(&self.global).chain(&self.builtin).collect()
    }
}

// ─── Spawning ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SubAgentResult {
    pub id: String,
    pub agent_type: String,
    pub status: SubAgentStatus,
    /// Final assistant text, or the error message for `Failed`.
    pub output: String,
}

/// Per-spawn limits inherited from the main agent config.
#[derive(Debug, Clone)]
pub struct SubAgentLimits {
    pub max_iterations: u32,
    pub timeout: Duration,
    pub context_window: usize,
    pub chars_per_token: f32,
    pub native_tools: bool,
    pub idle_timeout: Duration,
}

impl Default for SubAgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            timeout: Duration::from_secs(300),
            context_window: 32_768,
            chars_per_token: 3.5,
            native_tools: true,
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Spawns typed sub-agents over restricted tool subsets.
pub struct SubAgentOrchestrator {
    model: Arc<dyn ModelClient>,
    gate: Arc<PermissionGate>,
    hooks: Arc<HookRunner>,
    checkpoints: Arc<CheckpointStore>,
    types: AgentTypeRegistry,
    limits: SubAgentLimits,
    workdir: PathBuf,
    /// The main registry, wired after registration because the task tool it
    /// contains refers back to this orchestrator.
    registry: OnceLock<Arc<ToolRegistry>>,
}

impl SubAgentOrchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        gate: Arc<PermissionGate>,
        hooks: Arc<HookRunner>,
        checkpoints: Arc<CheckpointStore>,
        types: AgentTypeRegistry,
        limits: SubAgentLimits,
        workdir: PathBuf,
    ) -> Self {
        Self {
            model,
            gate,
            hooks,
            checkpoints,
            types,
            limits,
            workdir,
            registry: OnceLock::new(),
        }
    }

    /// Wire the main tool registry.  Called once, after the task tool has
    /// been registered into it.
    pub fn wire_registry(&self, registry: Arc<ToolRegistry>) {
        let _ = self.registry.set(registry);
    }

    pub fn types(&self) -> &AgentTypeRegistry {
        &self.types
    }

    /// Run one sub-agent to completion.  Unknown type names fail the spawn.
    pub async fn spawn(
        &self,
        task: &str,
        type_name: Option<&str>,
        cancel: &CancelToken,
    ) -> SubAgentResult {
        let id = format!("sub-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let type_name = type_name.unwrap_or("general");
        let mut result = SubAgentResult {
            id: id.clone(),
            agent_type: type_name.to_string(),
            status: SubAgentStatus::Pending,
            output: String::new(),
        };

        let Some(agent_type) = self.types.resolve(type_name) else {
            result.status = SubAgentStatus::Failed;
            result.output = format!("unknown agent type: {type_name}");
            return result;
        };
        let Some(registry) = self.registry.get() else {
            result.status = SubAgentStatus::Failed;
            result.output = "orchestrator registry not wired".into();
            return result;
        };

        // Filter the main registry down to the allowed set, sharing tool
        // instances so every wiring (supervisor, limiter, callbacks) holds.
        let tools = match &agent_type.allowed_tools {
            Some(names) => Arc::new(registry.subset(names)),
            None => Arc::clone(registry),
        };

        let prompt = render_template(&agent_type.prompt, task, &self.workdir);
        let mut system = prompt;
        if !self.limits.native_tools {
            system.push_str("\n\n");
            system.push_str(&prompts::text_tool_protocol(&tools.schemas()));
        }
        let mut convo = Conversation::with_system(self.limits.chars_per_token, system);
        convo.push(Message::user(task));

        // Sub-agent events go nowhere for now; a drain task keeps the
        // channel from backing up.
        let (tx, mut rx) = mpsc::channel(256);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let engine = TurnEngine::new(
            Arc::clone(&self.model),
            tools.clone(),
            Arc::clone(&self.gate),
            Arc::clone(&self.hooks),
            Arc::clone(&self.checkpoints),
            id.clone(),
            PermissionMode::Normal,
            self.limits.native_tools,
            self.limits.idle_timeout,
            tx.clone(),
        );
        let mut runner = LoopRunner::new(
            engine,
            self.limits.max_iterations,
            0.8,
            4,
            self.limits.context_window,
            Some(self.limits.timeout),
            tools.names(),
            tx,
        );

        result.status = SubAgentStatus::Running;
        debug!(id = %result.id, agent_type = %result.agent_type, "sub-agent started");

        match runner.run(&mut convo, cancel).await {
            Ok(LoopOutcome::Completed) | Ok(LoopOutcome::BudgetExhausted) => {
                result.status = SubAgentStatus::Completed;
                result.output = convo
                    .last_assistant_text()
                    .unwrap_or_else(|| "(sub-agent produced no text output)".into());
            }
            Ok(LoopOutcome::Cancelled) => {
                result.status = SubAgentStatus::Cancelled;
                result.output = convo.last_assistant_text().unwrap_or_default();
            }
            Err(e) => {
                warn!(id = %result.id, error = %e, "sub-agent failed");
                result.status = SubAgentStatus::Failed;
                result.output = format!("sub-agent error: {e}");
            }
        }
        result
    }

    /// Start every task concurrently and await completion.  Results are
    /// collected by agent id; completion order is unspecified.
    pub async fn spawn_parallel(
        self: &Arc<Self>,
        tasks: Vec<(String, Option<String>)>,
        cancel: &CancelToken,
    ) -> HashMap<String, SubAgentResult> {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|(task, type_name)| {
                let orch = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    orch.spawn(&task, type_name.as_deref(), &cancel).await
                })
            })
            .collect();

        let mut results = HashMap::new();
        for handle in handles {
            match handle.await {
                Ok(result) => {
                    results.insert(result.id.clone(), result);
                }
                Err(e) => warn!(error = %e, "sub-agent task panicked"),
            }
        }
        results
    }
}

fn render_template(template: &str, task: &str, workdir: &Path) -> String {
    template
        .replace("{{TASK}}", task)
        .replace("{{CWD}}", &workdir.display().to_string())
        .replace("{{PLATFORM}}", std::env::consts::OS)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
