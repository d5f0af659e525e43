// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::fsio::write_with_retry;

/// One snapshotted file in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Absolute path of the live file.
    pub path: PathBuf,
    /// Backup filename inside the session's checkpoint directory.
    pub backup: String,
    pub snapshot_time: DateTime<Utc>,
    pub original_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    entries: Vec<CheckpointEntry>,
}

/// Snapshots a file before its first mutation in a session, so any edit made
/// by the agent can be undone.
///
/// On-disk layout: `<root>/<session-id>/manifest.json` plus `.bak` files
/// named `<yyyymmdd_HHmmss>_<12-hex>.bak`.
pub struct CheckpointStore {
    root: PathBuf,
    /// Manifests loaded this process, keyed by session id.  Loads lazily
    /// from disk so a resumed session keeps its first-mutation-wins rule.
    manifests: Mutex<HashMap<String, Manifest>>,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), manifests: Mutex::new(HashMap::new()) }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn load_manifest(&self, session_id: &str) -> Manifest {
        let path = self.session_dir(session_id).join("manifest.json");
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => Manifest::default(),
        }
    }

    async fn persist_manifest(&self, session_id: &str, manifest: &Manifest) -> anyhow::Result<()> {
        let path = self.session_dir(session_id).join("manifest.json");
        let json = serde_json::to_string_pretty(manifest)?;
        write_with_retry(&path, json.as_bytes()).await
    }

    /// Snapshot `path` for `session_id`.  Idempotent per (path, session):
    /// returns `Ok(false)` without work when the manifest already holds the
    /// path, or when the file does not exist yet (a creation needs no
    /// backup).  Returns `Ok(true)` when a backup was written.
    pub async fn snapshot(&self, path: &Path, session_id: &str) -> anyhow::Result<bool> {
        let mut manifests = self.manifests.lock().await;
        let manifest = manifests
            .entry(session_id.to_string())
            .or_insert_with(|| self.load_manifest(session_id));

        if manifest.entries.iter().any(|e| e.path == path) {
            return Ok(false);
        }
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        let now = Utc::now();
        let backup = format!("{}_{}.bak", now.format("%Y%m%d_%H%M%S"), path_hash(path));
        let backup_path = self.session_dir(session_id).join(&backup);
        write_with_retry(&backup_path, &bytes).await?;

        manifest.entries.push(CheckpointEntry {
            path: path.to_path_buf(),
            backup,
            snapshot_time: now,
            original_size: bytes.len() as u64,
        });
        let snapshot = manifest.clone();
        debug!(path = %path.display(), session = session_id, "checkpoint taken");
        self.persist_manifest(session_id, &snapshot).await?;
        Ok(true)
    }

    pub async fn list(&self, session_id: &str) -> Vec<CheckpointEntry> {
        let mut manifests = self.manifests.lock().await;
        manifests
            .entry(session_id.to_string())
            .or_insert_with(|| self.load_manifest(session_id))
            .entries
            .clone()
    }

    /// Unified diff from the snapshot to the current file contents.
    /// A deleted live file diffs against empty.
    pub async fn diff(&self, path: &Path, session_id: &str) -> anyhow::Result<String> {
        let entry = self
            .find_entry(path, session_id)
            .await
            .with_context(|| format!("no checkpoint for {}", path.display()))?;
        let backup_path = self.session_dir(session_id).join(&entry.backup);
        let old = std::fs::read_to_string(&backup_path)
            .with_context(|| format!("reading backup {}", backup_path.display()))?;
        let new = std::fs::read_to_string(path).unwrap_or_default();
        let diff = similar::TextDiff::from_lines(&old, &new);
        Ok(diff
            .unified_diff()
            .header(&format!("{} (checkpoint)", path.display()), &path.display().to_string())
            .to_string())
    }

    /// Write the snapshot back over the live file, creating parent
    /// directories as needed.  Returns whether a restore happened.
    pub async fn restore(&self, path: &Path, session_id: &str) -> anyhow::Result<bool> {
        let Some(entry) = self.find_entry(path, session_id).await else {
            return Ok(false);
        };
        let backup_path = self.session_dir(session_id).join(&entry.backup);
        let bytes = std::fs::read(&backup_path)
            .with_context(|| format!("reading backup {}", backup_path.display()))?;
        write_with_retry(path, &bytes).await?;
        Ok(true)
    }

    /// Delete all backups and the manifest for a session.
    pub async fn clear(&self, session_id: &str) -> anyhow::Result<()> {
        self.manifests.lock().await.remove(session_id);
        let dir = self.session_dir(session_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("removing {}", dir.display()))?;
        }
        Ok(())
    }

    async fn find_entry(&self, path: &Path, session_id: &str) -> Option<CheckpointEntry> {
        let mut manifests = self.manifests.lock().await;
        manifests
            .entry(session_id.to_string())
            .or_insert_with(|| self.load_manifest(session_id))
            .entries
            .iter()
            .find(|e| e.path == path)
            .cloned()
    }
}

/// First 12 hex chars of the path's SHA-256, for collision-free backup names.
fn path_hash(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    hex::encode(&digest[..6])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
