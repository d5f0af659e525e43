// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! File-I/O helpers shared by every mutating tool: retrying writes, the
//! protected-path check, and the three-phase atomic multi-file write.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

/// Backoff schedule for transient write failures.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(100),
    Duration::from_millis(200),
];

/// Write `contents` to `path`, creating parent directories and retrying
/// transient I/O errors with exponential backoff.  Only surfaces an error
/// after the retry budget is exhausted.
pub async fn write_with_retry(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let mut attempt = 0;
    loop {
        match std::fs::write(path, contents) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < RETRY_DELAYS.len() => {
                warn!(
                    path = %path.display(),
                    attempt = attempt + 1,
                    error = %e,
                    "write failed; retrying"
                );
                tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("writing {} after retries", path.display()))
            }
        }
    }
}

/// True when `path` resolves to a filesystem root, a system directory, or a
/// user-profile root — locations no tool may delete or overwrite wholesale.
/// Symlinks are resolved before the check.
pub fn is_protected_path(path: &Path) -> bool {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    if resolved.parent().is_none() {
        return true; // "/" or a drive root
    }

    const SYSTEM_DIRS: &[&str] = &[
        "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/opt", "/proc", "/sbin", "/sys",
        "/usr", "/var",
    ];
    if SYSTEM_DIRS.iter().any(|d| resolved == Path::new(d)) {
        return true;
    }

    if let Some(home) = dirs::home_dir() {
        if resolved == home {
            return true;
        }
    }
    false
}

/// One pending write in an atomic multi-file edit.
pub struct PendingWrite {
    pub path: PathBuf,
    pub content: String,
}

/// Write every file in `writes` sequentially; on any failure, restore the
/// pre-write content of every file already written (deleting files that did
/// not previously exist) and surface the error.
///
/// The caller has already validated each edit against a read snapshot and
/// computed the final content per file — this is the third phase only.
pub async fn apply_atomic(writes: &[PendingWrite]) -> anyhow::Result<()> {
    // Capture pre-write contents for rollback.
    let mut originals: Vec<Option<Vec<u8>>> = Vec::with_capacity(writes.len());
    for w in writes {
        originals.push(std::fs::read(&w.path).ok());
    }

    for (i, w) in writes.iter().enumerate() {
        if let Err(e) = write_with_retry(&w.path, w.content.as_bytes()).await {
            warn!(
                path = %w.path.display(),
                error = %e,
                "atomic write failed; rolling back {} earlier write(s)",
                i
            );
            for (j, done) in writes[..i].iter().enumerate() {
                match &originals[j] {
                    Some(bytes) => {
                        let _ = std::fs::write(&done.path, bytes);
                    }
                    None => {
                        let _ = std::fs::remove_file(&done.path);
                    }
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
