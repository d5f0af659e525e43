// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tokio::sync::watch;

/// Cooperative cancellation, chained down every subsystem.
///
/// One [`CancelHandle`] is held by the frontend; [`CancelToken`] clones flow
/// into the loop runner, the turn engine, tool execution, and each
/// sub-agent.  Every suspension point either selects on [`CancelToken::
/// cancelled`] or polls [`CancelToken::is_cancelled`].
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Re-arm after a cancelled run so the next request starts clean.
    pub fn reset(&self) {
        let _ = self.tx.send(false);
    }
}

#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that never fires, for tests and one-shot runs.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation fires (or immediately if it already has).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for returns Err when the sender is dropped; treat a dropped
        // handle as cancellation so orphaned loops shut down.
        let _ = rx.wait_for(|v| *v).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
