//! Per-client sliding-window admission control.
//!
//! Each client keeps the instants of its admitted requests. On every call the
//! entries older than the window are pruned, then the request is admitted only
//! if fewer than `max_requests` remain. The check and the record happen under
//! the client's map entry lock, so two racing calls for one client cannot both
//! take the last slot, while calls for other clients proceed in parallel.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// - `max_requests`: requests allowed per window
    /// - `window`: length of the trailing window
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn admit(&self, client_id: &str) -> bool {
        self.admit_at(client_id, Instant::now())
    }

    pub fn admit_at(&self, client_id: &str, now: Instant) -> bool {
        let mut stamps = self.windows.entry(client_id.to_string()).or_default();
        prune(&mut stamps, now, self.window);

        if stamps.len() >= self.max_requests {
            warn!(client_id = client_id, "rate limit exceeded");
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Requests currently counted against `client_id`.
    pub fn usage(&self, client_id: &str) -> usize {
        self.windows.get(client_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Forgets clients with no request in the last two windows.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let idle_after = self.window.saturating_mul(2);
        self.windows.retain(|_, stamps| match stamps.back() {
            Some(last) => now.saturating_duration_since(*last) <= idle_after,
            None => false,
        });
        before.saturating_sub(self.windows.len())
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = stamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

/// Runs `evict_idle` once per window for the life of the process.
pub fn spawn_eviction(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter.window());
        loop {
            ticker.tick().await;
            let evicted = limiter.evict_idle(Instant::now());
            debug!(evicted = evicted, tracked = limiter.tracked_clients(), "rate-limit sweep");
        }
    })
}
