// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistent notes the agent accumulates across conversations.
//!
//! Each memory is one markdown file named `<yyyymmdd>-<6-char hash>.md`.
//! Project memories live in `<project>/.orca/memory/`; the global directory
//! under the config dir is the fallback for work outside a project.  On
//! conversation start every file from both locations (project first,
//! newest-first) is concatenated into the system prompt.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::fsio::write_with_retry;

pub struct MemoryStore {
    project_dir: Option<PathBuf>,
    global_dir: PathBuf,
    max_files: usize,
}

impl MemoryStore {
    /// `project_root` is the working directory of the session (its
    /// `.orca/memory/` is used when present); `global_dir` is
    /// `<config>/memory/`.
    pub fn new(project_root: Option<&Path>, global_dir: impl Into<PathBuf>, max_files: usize) -> Self {
        Self {
            project_dir: project_root.map(|p| p.join(".orca/memory")),
            global_dir: global_dir.into(),
            max_files,
        }
    }

    /// Append a learnings note, then prune the oldest files beyond the cap.
    /// Writes to the project directory when one exists, else globally.
    pub async fn store(&self, learnings: &str) -> anyhow::Result<PathBuf> {
        let trimmed = learnings.trim();
        anyhow::ensure!(!trimmed.is_empty(), "refusing to store an empty memory");

        let dir = self.project_dir.clone().unwrap_or_else(|| self.global_dir.clone());
        let name = format!("{}-{}.md", Utc::now().format("%Y%m%d"), content_hash(trimmed));
        let path = dir.join(name);
        write_with_retry(&path, trimmed.as_bytes()).await?;
        debug!(path = %path.display(), "memory stored");

        self.prune(&dir)?;
        Ok(path)
    }

    /// All memory text, project then global, newest-first within each,
    /// ready for inclusion in the system prompt.  Empty string when there
    /// are no memories.
    pub fn load_context(&self) -> String {
        let mut sections = Vec::new();
        if let Some(dir) = &self.project_dir {
            sections.extend(read_dir_newest_first(dir));
        }
        sections.extend(read_dir_newest_first(&self.global_dir));
        sections.join("\n\n")
    }

    /// Remove the oldest files (by modification time) beyond `max_files`.
    fn prune(&self, dir: &Path) -> anyhow::Result<()> {
        let mut files = md_files_by_mtime(dir);
        if files.len() <= self.max_files {
            return Ok(());
        }
        files.reverse(); // oldest first
        let excess = files.len() - self.max_files;
        for (path, _) in files.into_iter().take(excess) {
            std::fs::remove_file(&path)
                .with_context(|| format!("pruning {}", path.display()))?;
            debug!(path = %path.display(), "memory pruned");
        }
        Ok(())
    }
}

fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..3])
}

/// Markdown files in `dir` sorted newest-first by mtime.
fn md_files_by_mtime(dir: &Path) -> Vec<(PathBuf, std::time::SystemTime)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((e.path(), mtime))
        })
        .collect();
    files.sort_by(|a, b| b.1.cmp(&a.1));
    files
}

fn read_dir_newest_first(dir: &Path) -> Vec<String> {
    md_files_by_mtime(dir)
        .into_iter()
        .filter_map(|(path, _)| match std::fs::read_to_string(&path) {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable memory file");
                None
            }
        })
        .filter(|t| !t.is_empty())
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
