//! Sliding-window rate limiter keyed by client identity.
//!
//! The outer map is only locked long enough to find or create a client's
//! window; each window has its own lock so unrelated clients never contend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RateLimitConfig;
use crate::error::GateError;

type Window = Arc<Mutex<VecDeque<Instant>>>;

/// Process-local request counter per client key.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: RwLock<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window,
            windows: RwLock::new(HashMap::new()),
        }
    }

    fn window_for(&self, key: &str) -> Window {
        {
            let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
            if let Some(window) = windows.get(key) {
                return Arc::clone(window);
            }
        }
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(windows.entry(key.to_string()).or_default())
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Count one request for `key`, rejecting it if the window is full.
    pub fn check(&self, key: &str) -> Result<(), GateError> {
        let window = self.window_for(key);
        let mut timestamps = window.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        self.prune(&mut timestamps, now);

        if timestamps.len() >= self.max_requests {
            debug!(client = key, count = timestamps.len(), "Rate limit exceeded");
            return Err(GateError::RateLimitExceeded);
        }
        timestamps.push_back(now);
        Ok(())
    }

    /// Requests currently counted against `key`.
    pub fn current(&self, key: &str) -> usize {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        let Some(window) = windows.get(key) else {
            return 0;
        };
        let mut timestamps = window.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut timestamps, Instant::now());
        timestamps.len()
    }

    /// Drop windows that hold no live timestamps. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, window| {
            // A window someone else holds right now is never dropped.
            if Arc::strong_count(window) > 1 {
                return true;
            }
            let mut timestamps = window.lock().unwrap_or_else(|e| e.into_inner());
            self.prune(&mut timestamps, now);
            !timestamps.is_empty()
        });
        before - windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Spawn a background task that drops idle client windows every `every`.
pub fn spawn_prune_task(limiter: Arc<RateLimiter>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = limiter.prune_idle();
            if removed > 0 {
                info!(removed, remaining = limiter.tracked_clients(), "Pruned idle rate-limit windows");
            }
        }
    })
}
