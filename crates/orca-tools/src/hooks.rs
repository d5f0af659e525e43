// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use orca_config::HooksConfig;

/// Wall-clock cap for a single hook invocation.
const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes of tool result exposed to post-hooks via `ORCA_TOOL_RESULT`.
const RESULT_ENV_CAP: usize = 10_000;

/// Outcome of a pre-hook run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreHookOutcome {
    Allowed,
    /// The hook exited non-zero; the tool must not run.
    Blocked { exit_code: i32 },
}

/// Runs user-configured shell commands around each tool call.
///
/// Commands are looked up under the tool's name, falling back to the
/// wildcard `*` entry.  Pre-hooks gate execution; post-hooks are
/// fire-and-log.
pub struct HookRunner {
    cfg: HooksConfig,
}

impl HookRunner {
    pub fn new(cfg: HooksConfig) -> Self {
        Self { cfg }
    }

    fn lookup<'a>(map: &'a std::collections::HashMap<String, String>, tool: &str) -> Option<&'a str> {
        map.get(tool).or_else(|| map.get("*")).map(String::as_str)
    }

    /// Run the pre-hook for `tool`, if configured.  A non-zero exit blocks
    /// the tool; a timeout or spawn failure is logged and does not block.
    pub async fn run_pre(&self, tool: &str, args_json: &str) -> PreHookOutcome {
        let Some(cmd) = Self::lookup(&self.cfg.pre, tool) else {
            return PreHookOutcome::Allowed;
        };
        debug!(tool, cmd, "running pre-hook");
        match run_hook(cmd, tool, args_json, None).await {
            Some(code) if code != 0 => PreHookOutcome::Blocked { exit_code: code },
            _ => PreHookOutcome::Allowed,
        }
    }

    /// Run the post-hook for `tool`, if configured.  The exit code is
    /// logged, never propagated.
    pub async fn run_post(&self, tool: &str, args_json: &str, result: &str, is_error: bool) {
        let Some(cmd) = Self::lookup(&self.cfg.post, tool) else {
            return;
        };
        debug!(tool, cmd, "running post-hook");
        let code = run_hook(cmd, tool, args_json, Some((result, is_error))).await;
        if let Some(code) = code {
            if code != 0 {
                warn!(tool, code, "post-hook exited non-zero");
            }
        }
    }
}

/// Spawn the hook command through the shell with the tool-call environment.
/// Returns the exit code, or `None` on spawn failure / timeout (both logged).
async fn run_hook(
    cmd: &str,
    tool: &str,
    args_json: &str,
    result: Option<(&str, bool)>,
) -> Option<i32> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .env("ORCA_TOOL_NAME", tool)
        .env("ORCA_TOOL_ARGS", args_json)
        .kill_on_drop(true);
    if let Some((body, is_error)) = result {
        let truncated = truncate_bytes(body, RESULT_ENV_CAP);
        command
            .env("ORCA_TOOL_RESULT", truncated)
            .env("ORCA_TOOL_ERROR", if is_error { "True" } else { "False" });
    }

    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!(tool, error = %e, "hook spawn failed");
            return None;
        }
    };

    match tokio::time::timeout(HOOK_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(e)) => {
            warn!(tool, error = %e, "hook wait failed");
            None
        }
        Err(_) => {
            warn!(tool, "hook exceeded 30s; killing");
            let _ = child.kill().await;
            None
        }
    }
}

/// Truncate to at most `cap` bytes on a char boundary.
fn truncate_bytes(s: &str, cap: usize) -> &str {
    if s.len() <= cap {
        return s;
    }
    let mut end = cap;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn runner(pre: &[(&str, &str)], post: &[(&str, &str)]) -> HookRunner {
        let to_map = |pairs: &[(&str, &str)]| -> HashMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };
        HookRunner::new(HooksConfig { pre: to_map(pre), post: to_map(post) })
    }

    #[tokio::test]
    async fn no_hook_configured_allows() {
        let r = runner(&[], &[]);
        assert_eq!(r.run_pre("bash", "{}").await, PreHookOutcome::Allowed);
    }

    #[tokio::test]
    async fn zero_exit_allows() {
        let r = runner(&[("bash", "true")], &[]);
        assert_eq!(r.run_pre("bash", "{}").await, PreHookOutcome::Allowed);
    }

    #[tokio::test]
    async fn non_zero_exit_blocks() {
        let r = runner(&[("bash", "exit 3")], &[]);
        assert_eq!(r.run_pre("bash", "{}").await, PreHookOutcome::Blocked { exit_code: 3 });
    }

    #[tokio::test]
    async fn wildcard_hook_applies_to_any_tool() {
        let r = runner(&[("*", "exit 1")], &[]);
        assert!(matches!(r.run_pre("write_file", "{}").await, PreHookOutcome::Blocked { .. }));
    }

    #[tokio::test]
    async fn named_hook_shadows_wildcard() {
        let r = runner(&[("bash", "true"), ("*", "exit 1")], &[]);
        assert_eq!(r.run_pre("bash", "{}").await, PreHookOutcome::Allowed);
    }

    #[tokio::test]
    async fn hook_sees_tool_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");
        let cmd = format!("echo \"$ORCA_TOOL_NAME:$ORCA_TOOL_ARGS\" > {}", out.display());
        let r = runner(&[("grep", cmd.as_str())], &[]);
        r.run_pre("grep", r#"{"pattern":"x"}"#).await;
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), r#"grep:{"pattern":"x"}"#);
    }

    #[tokio::test]
    async fn post_hook_failure_is_not_propagated() {
        let r = runner(&[], &[("bash", "exit 7")]);
        // Must not panic or error; the exit code is only logged.
        r.run_post("bash", "{}", "output", false).await;
    }

    #[tokio::test]
    async fn post_hook_sees_result_and_error_flag() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("post.txt");
        let cmd = format!("echo \"$ORCA_TOOL_RESULT:$ORCA_TOOL_ERROR\" > {}", out.display());
        let r = runner(&[], &[("bash", cmd.as_str())]);
        r.run_post("bash", "{}", "boom", true).await;
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "boom:True");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "aé"; // 'é' is two bytes starting at index 1
        assert_eq!(truncate_bytes(s, 2), "a");
        assert_eq!(truncate_bytes(s, 3), "aé");
    }
}
