// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// Enforces a minimum delay between requests to the same host.
///
/// One async mutex per host guards that host's last-request instant; the
/// sleep happens while it is held, so concurrent callers to the same host
/// serialize and each observes the full interval.  Different hosts never
/// contend.  Unparseable URLs bypass throttling.
pub struct RateLimiter {
    min_interval: Duration,
    hosts: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<Instant>>>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, hosts: Mutex::new(HashMap::new()) }
    }

    /// Sleep as needed so that at least `min_interval` has elapsed since the
    /// previous `throttle` return for this URL's host.
    pub async fn throttle(&self, url: &str) {
        let Some(host) = host_of(url) else {
            return;
        };
        let cell = {
            let mut hosts = self.hosts.lock().unwrap();
            Arc::clone(hosts.entry(host.clone()).or_default())
        };
        let mut last = cell.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let delay = self.min_interval - elapsed;
                debug!(%host, ?delay, "rate limiting request");
                tokio::time::sleep(delay).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url).ok()?.host_str().map(str::to_string)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
