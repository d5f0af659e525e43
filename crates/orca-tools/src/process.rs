// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Supervisor for background child processes.
//!
//! Every child the agent spawns is owned by one [`ProcessSupervisor`], keyed
//! by a 4-char id.  Stdout and stderr are drained line-by-line into a bounded
//! ring buffer that consumers read through a cursor, so a long-running build
//! can be polled across turns without unbounded memory growth.  All children
//! are killed before the host process exits.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lines retained per process.
const RING_CAPACITY: usize = 1000;

/// How long a finished process record stays readable before it is reaped.
const DRAIN_WINDOW: Duration = Duration::from_secs(60);

/// Bounded line buffer with a monotone total-appended counter.
///
/// The counter doubles as the consumer cursor: `total - lines.len()` is the
/// index of the oldest retained line.
#[derive(Debug, Default)]
struct RingBuffer {
    lines: VecDeque<String>,
    total: u64,
}

impl RingBuffer {
    fn push(&mut self, line: String) {
        if self.lines.len() == RING_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.total += 1;
    }
}

/// A supervised background process.
pub struct ProcessRecord {
    pub id: String,
    pub command: String,
    pub cwd: PathBuf,
    pub started: DateTime<Utc>,
    pid: u32,
    /// Line list and total counter share one mutex; reads and writes always
    /// take it together so the cursor arithmetic stays consistent.
    buf: Mutex<RingBuffer>,
    /// `None` while running; the child's exit code once it terminates.
    exit: watch::Receiver<Option<i32>>,
}

impl ProcessRecord {
    /// Last `n` retained lines.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let buf = self.buf.lock().unwrap();
        let skip = buf.lines.len().saturating_sub(n);
        buf.lines.iter().skip(skip).cloned().collect()
    }

    /// Lines appended since `cursor`, plus the new cursor.
    ///
    /// When the ring has evicted lines past the caller's cursor, the read is
    /// clamped to what is still retained; the returned cursor always lets the
    /// caller resume.  Each line is observed at most once per consumer and
    /// never mutated after observation.
    pub fn new_lines(&self, cursor: u64) -> (Vec<String>, u64) {
        let buf = self.buf.lock().unwrap();
        let oldest = buf.total - buf.lines.len() as u64;
        let start = cursor.clamp(oldest, buf.total);
        let skip = (start - oldest) as usize;
        let lines = buf.lines.iter().skip(skip).cloned().collect();
        (lines, buf.total)
    }

    /// Total lines ever appended (monotone).
    pub fn total_lines(&self) -> u64 {
        self.buf.lock().unwrap().total
    }

    /// The child's exit code, or `None` while it is still running.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.exit_code().is_none()
    }

    /// Wait until the child exits.  Returns `true` iff it exited before the
    /// deadline.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.exit.clone();
        tokio::time::timeout(timeout, rx.wait_for(|v| v.is_some()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    fn push_line(&self, line: String) {
        self.buf.lock().unwrap().push(line);
    }
}

/// Owns all background children.  The id→record map takes its own lock; each
/// record's ring buffer has a separate mutex, so readers of one process never
/// contend with writers of another.
pub struct ProcessSupervisor {
    procs: Mutex<HashMap<String, Arc<ProcessRecord>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { procs: Mutex::new(HashMap::new()) })
    }

    /// Spawn `command` through the platform shell and start draining its
    /// output.  The command text is handed to the shell on stdin (never by
    /// argument concatenation) so no extra quoting layer can inject.
    pub async fn start(
        self: &Arc<Self>,
        command: &str,
        cwd: &Path,
    ) -> anyhow::Result<Arc<ProcessRecord>> {
        let id = short_id();

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/c").arg(command);
            c
        } else {
            let mut c = Command::new("/bin/bash");
            c.stdin(Stdio::piped());
            c
        };
        cmd.current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning shell for: {command}"))?;

        // Unix: feed the command text on stdin, then close it so bash runs
        // the script and exits.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(command.as_bytes())
                .await
                .context("writing command to shell stdin")?;
            drop(stdin);
        }

        let pid = child.id().unwrap_or(0);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (exit_tx, exit_rx) = watch::channel(None);
        let record = Arc::new(ProcessRecord {
            id: id.clone(),
            command: command.to_string(),
            cwd: cwd.to_path_buf(),
            started: Utc::now(),
            pid,
            buf: Mutex::new(RingBuffer::default()),
            exit: exit_rx,
        });
        self.procs.lock().unwrap().insert(id.clone(), Arc::clone(&record));
        debug!(id = %id, pid, command, "background process started");

        // One drainer task per stream.
        if let Some(out) = stdout {
            let rec = Arc::clone(&record);
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    rec.push_line(line);
                }
            });
        }
        if let Some(err) = stderr {
            let rec = Arc::clone(&record);
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    rec.push_line(format!("[stderr] {line}"));
                }
            });
        }

        // Waiter task: publish the exit code, keep the record readable for a
        // drain window, then reap it.
        let sup = Arc::clone(self);
        let reap_id = id.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!(id = %reap_id, error = %e, "wait on child failed");
                    -1
                }
            };
            let _ = exit_tx.send(Some(code));
            tokio::time::sleep(DRAIN_WINDOW).await;
            sup.procs.lock().unwrap().remove(&reap_id);
        });

        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProcessRecord>> {
        self.procs.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ProcessRecord>> {
        let mut records: Vec<_> = self.procs.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| a.started.cmp(&b.started));
        records
    }

    /// Kill the entire process tree of `id` and drop its record.
    /// Idempotent: stopping an unknown or already-exited id succeeds.
    pub fn stop(&self, id: &str) {
        let record = self.procs.lock().unwrap().remove(id);
        if let Some(rec) = record {
            if rec.is_running() {
                kill_tree(rec.pid);
                debug!(id = %rec.id, pid = rec.pid, "background process stopped");
            }
        }
    }

    /// Drop an exited process record without killing anything.
    pub fn remove(&self, id: &str) {
        self.procs.lock().unwrap().remove(id);
    }

    /// Kill every supervised child.  Called before the host process exits.
    pub fn shutdown(&self) {
        let records: Vec<_> = {
            let mut procs = self.procs.lock().unwrap();
            procs.drain().map(|(_, r)| r).collect()
        };
        for rec in records {
            if rec.is_running() {
                kill_tree(rec.pid);
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Kill a process group (the child was spawned as its own group leader).
fn kill_tree(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .output();
    }
}

/// 4-char opaque process id.
fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..4].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
