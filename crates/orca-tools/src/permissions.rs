// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use orca_config::{PermissionMode, ToolsConfig};

use crate::tool::RiskTier;

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionVerdict {
    Approved,
    Denied,
    /// Plan mode: the intent was recorded; the tool must not run.
    PlanDeferred,
}

/// Answer from an interactive permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    Yes,
    No,
    /// Approve and stop asking for this tool for the rest of the session.
    AlwaysForTool,
}

/// Callback surface for interactive approval.  Wired post-registration by
/// the frontend; headless runs leave it empty and unmatched calls are denied.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    async fn ask(&self, tool: &str, args_json: &str) -> PromptChoice;
}

/// A `ToolName` or `ToolName(arg glob)` pattern from the allow/deny lists.
/// Tool names match case-insensitively; the glob is tested against the
/// canonical JSON serialization of the call arguments.
#[derive(Debug)]
struct Pattern {
    tool: String,
    arg_glob: Option<Regex>,
}

impl Pattern {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some((name, rest)) = raw.split_once('(') {
            let glob = rest.strip_suffix(')')?;
            Some(Self {
                tool: name.trim().to_lowercase(),
                arg_glob: glob_to_regex(glob),
            })
        } else {
            Some(Self { tool: raw.to_lowercase(), arg_glob: None })
        }
    }

    fn matches(&self, tool: &str, args_json: &str) -> bool {
        if self.tool != tool {
            return false;
        }
        match &self.arg_glob {
            Some(re) => re.is_match(args_json),
            None => true,
        }
    }
}

/// Convert a simple shell glob to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// A tool invocation recorded instead of executed while in plan mode.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub tool: String,
    pub args_json: String,
}

/// Decides whether a tool call may proceed, by risk tier, allow/deny
/// patterns, and interactive prompts.
pub struct PermissionGate {
    allow: Vec<Pattern>,
    deny: Vec<Pattern>,
    auto_approve_moderate: bool,
    auto_approve_all: bool,
    /// Tool names approved with "always" during this session.
    session_allow: Mutex<HashSet<String>>,
    /// Intents recorded in plan mode.
    planned: Mutex<Vec<PlannedStep>>,
    prompter: RwLock<Option<std::sync::Arc<dyn PermissionPrompter>>>,
}

impl PermissionGate {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Pattern> {
            patterns.iter().filter_map(|p| Pattern::parse(p)).collect()
        };
        Self {
            allow: compile(&cfg.allow),
            deny: compile(&cfg.deny),
            auto_approve_moderate: cfg.auto_approve_moderate,
            auto_approve_all: cfg.auto_approve_all,
            session_allow: Mutex::new(HashSet::new()),
            planned: Mutex::new(Vec::new()),
            prompter: RwLock::new(None),
        }
    }

    /// Wire the interactive prompter.  Called once after construction,
    /// before the agent loop starts.
    pub fn set_prompter(&self, prompter: std::sync::Arc<dyn PermissionPrompter>) {
        *self.prompter.write().unwrap() = Some(prompter);
    }

    /// Planned steps recorded so far (plan mode).
    pub fn planned_steps(&self) -> Vec<PlannedStep> {
        self.planned.lock().unwrap().clone()
    }

    /// Decide whether a call may proceed.
    ///
    /// Decision order: plan-deferral, ask-mode denial, deny patterns, allow
    /// patterns / risk ceiling / session allow list, interactive prompt.
    /// Deny patterns win over allow patterns when both match.
    pub async fn check(
        &self,
        tool: &str,
        args: &Value,
        mode: PermissionMode,
        risk: RiskTier,
    ) -> PermissionVerdict {
        let tool_lc = tool.to_lowercase();
        let args_json = args.to_string();

        if mode == PermissionMode::Plan && risk != RiskTier::ReadOnly {
            self.planned.lock().unwrap().push(PlannedStep {
                tool: tool_lc,
                args_json,
            });
            return PermissionVerdict::PlanDeferred;
        }

        if mode == PermissionMode::Ask {
            return PermissionVerdict::Denied;
        }

        if self.deny.iter().any(|p| p.matches(&tool_lc, &args_json)) {
            return PermissionVerdict::Denied;
        }

        let risk_approved = match risk {
            RiskTier::ReadOnly => true,
            RiskTier::Moderate => self.auto_approve_moderate || self.auto_approve_all,
            RiskTier::Dangerous => self.auto_approve_all,
        };
        if risk_approved
            || self.session_allow.lock().unwrap().contains(&tool_lc)
            || self.allow.iter().any(|p| p.matches(&tool_lc, &args_json))
        {
            return PermissionVerdict::Approved;
        }

        let prompter = self.prompter.read().unwrap().clone();
        match prompter {
            Some(p) => match p.ask(&tool_lc, &args_json).await {
                PromptChoice::Yes => PermissionVerdict::Approved,
                PromptChoice::No => PermissionVerdict::Denied,
                PromptChoice::AlwaysForTool => {
                    self.session_allow.lock().unwrap().insert(tool_lc);
                    PermissionVerdict::Approved
                }
            },
            None => {
                warn!(tool = %tool_lc, "no prompter wired; denying unapproved call");
                PermissionVerdict::Denied
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
