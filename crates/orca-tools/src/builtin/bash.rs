// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::process::ProcessSupervisor;
use crate::tool::{arg_str, arg_u64, OutputSink, RiskTier, Tool, ToolCall, ToolResult};

/// Interval between output polls while the command runs.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs a shell command under the process supervisor.
///
/// The tool never blocks the agent loop past its timeout: when the deadline
/// passes, the still-running process is left in the background and the model
/// gets its id plus pointers to `get_process_output` / `stop_process`.
pub struct BashTool {
    pub supervisor: Arc<ProcessSupervisor>,
    pub default_timeout_secs: u64,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command.\n\n\
         Output (stdout and stderr) streams back as it is produced; stderr \
         lines are prefixed with [stderr].\n\n\
         ## Long-running commands\n\
         If the command is still running when timeout_seconds expires (default \
         30), it keeps running in the background and the result gives you its \
         process ID. Poll it with get_process_output and terminate it with \
         stop_process. Use this deliberately for servers and watchers: set a \
         short timeout and poll.\n\n\
         ## Notes\n\
         - Use read_file / grep / glob_file_search for file inspection instead \
           of cat / grep / find\n\
         - Chain dependent commands with '&&'; independent commands can be \
           separate calls\n\
         - A completed command reports 'Exit code: N' followed by its output"
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Moderate
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "cwd": { "type": "string", "description": "Working directory (default: current)" },
                "timeout_seconds": {
                    "type": "integer",
                    "description": "Seconds to wait before backgrounding (default 30)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        // Buffered fallback: close the sink up front so sends fail fast
        // instead of filling an unread channel.
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        drop(rx);
        self.execute_streaming(call, tx).await
    }

    async fn execute_streaming(&self, call: &ToolCall, sink: OutputSink) -> ToolResult {
        let Some(command) = arg_str(&call.args, "command") else {
            return ToolResult::err(&call.id, "missing 'command' argument");
        };
        let cwd = arg_str(&call.args, "cwd")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let timeout = Duration::from_secs(
            arg_u64(&call.args, "timeout_seconds").unwrap_or(self.default_timeout_secs),
        );
        debug!(command, cwd = %cwd.display(), ?timeout, "bash tool");

        let record = match self.supervisor.start(&command, &cwd).await {
            Ok(r) => r,
            Err(e) => return ToolResult::err(&call.id, format!("spawn failed: {e}")),
        };

        let deadline = Instant::now() + timeout;
        let mut cursor = 0u64;
        let mut collected: Vec<String> = Vec::new();

        loop {
            let (lines, next_cursor) = record.new_lines(cursor);
            cursor = next_cursor;
            for line in lines {
                let _ = sink.send(line.clone()).await;
                collected.push(line);
            }

            if let Some(code) = record.exit_code() {
                // Drain whatever arrived between the last poll and exit.
                tokio::time::sleep(POLL_INTERVAL).await;
                let (rest, _) = record.new_lines(cursor);
                for line in rest {
                    let _ = sink.send(line.clone()).await;
                    collected.push(line);
                }
                self.supervisor.remove(&record.id);
                let body = if collected.is_empty() {
                    format!("Exit code: {code}")
                } else {
                    format!("Exit code: {code}\n{}", collected.join("\n"))
                };
                return ToolResult::ok(&call.id, body);
            }

            if Instant::now() >= deadline {
                return ToolResult::ok(
                    &call.id,
                    format!(
                        "Command is still running in the background (process ID: \"{}\").\n\
                         Working directory: {}\n\
                         Use get_process_output to read new output and \
                         stop_process to terminate it.",
                        record.id,
                        cwd.display()
                    ),
                );
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
