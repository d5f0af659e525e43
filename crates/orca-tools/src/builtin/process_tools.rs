// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model-facing tools over the process supervisor: poll output, stop, list.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::process::ProcessSupervisor;
use crate::tool::{arg_str, arg_u64, RiskTier, Tool, ToolCall, ToolResult};

pub struct GetProcessOutputTool {
    pub supervisor: Arc<ProcessSupervisor>,
}

#[async_trait]
impl Tool for GetProcessOutputTool {
    fn name(&self) -> &str {
        "get_process_output"
    }

    fn description(&self) -> &str {
        "Read output from a background process started by bash.\n\
         Pass the cursor from the previous call to receive only new lines; \
         the result ends with '[cursor: N]' to pass next time.  Also reports \
         whether the process has exited."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::ReadOnly
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Process ID from bash" },
                "cursor": { "type": "integer", "description": "Cursor from the previous call (default 0)" }
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(id) = arg_str(&call.args, "id") else {
            return ToolResult::err(&call.id, "missing 'id' argument");
        };
        let Some(record) = self.supervisor.get(&id) else {
            return ToolResult::err(&call.id, format!("no such process: {id}"));
        };
        let cursor = arg_u64(&call.args, "cursor").unwrap_or(0);
        let (lines, next) = record.new_lines(cursor);

        let status = match record.exit_code() {
            Some(code) => format!("exited with code {code}"),
            None => "still running".into(),
        };
        let body = if lines.is_empty() {
            format!("(no new output; {status})\n[cursor: {next}]")
        } else {
            format!("{}\n({status})\n[cursor: {next}]", lines.join("\n"))
        };
        ToolResult::ok(&call.id, body)
    }
}

pub struct StopProcessTool {
    pub supervisor: Arc<ProcessSupervisor>,
}

#[async_trait]
impl Tool for StopProcessTool {
    fn name(&self) -> &str {
        "stop_process"
    }

    fn description(&self) -> &str {
        "Terminate a background process (and its whole process tree) started \
         by bash.  Stopping an already-finished process is not an error."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Moderate
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Process ID from bash" }
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(id) = arg_str(&call.args, "id") else {
            return ToolResult::err(&call.id, "missing 'id' argument");
        };
        self.supervisor.stop(&id);
        ToolResult::ok(&call.id, format!("Stopped process {id}"))
    }
}

pub struct ListProcessesTool {
    pub supervisor: Arc<ProcessSupervisor>,
}

#[async_trait]
impl Tool for ListProcessesTool {
    fn name(&self) -> &str {
        "list_processes"
    }

    fn description(&self) -> &str {
        "List background processes: id, status, start time, and command."
    }

    fn risk(&self) -> RiskTier {
        RiskTier::ReadOnly
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let records = self.supervisor.list();
        if records.is_empty() {
            return ToolResult::ok(&call.id, "(no background processes)");
        }
        let lines: Vec<String> = records
            .iter()
            .map(|r| {
                let status = match r.exit_code() {
                    Some(code) => format!("exited({code})"),
                    None => "running".into(),
                };
                format!(
                    "{}  {}  started {}  {}",
                    r.id,
                    status,
                    r.started.format("%H:%M:%S"),
                    r.command
                )
            })
            .collect();
        ToolResult::ok(&call.id, lines.join("\n"))
    }
}
