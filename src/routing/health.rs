//! Health probe: memoized liveness checks per dependency.
//!
//! A probe result is trusted for `check_interval`. Each dependency has its own
//! lock, held across the probe, so concurrent requests for the same dependency
//! wait for the in-flight check instead of issuing their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Dependency;

/// A cheap "is this endpoint up" check. Implementations must not panic and
/// must bound their own latency.
#[async_trait]
pub trait LivenessCheck: Send + Sync {
    async fn is_alive(&self, endpoint: &str) -> bool;
}

/// HEAD first, then GET if HEAD fails. Any response below 500 counts as alive.
pub struct HttpLivenessCheck {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpLivenessCheck {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn attempt(&self, request: reqwest::RequestBuilder) -> Result<(), String> {
        let resp = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status().is_server_error() {
            return Err(format!("HTTP {}", resp.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl LivenessCheck for HttpLivenessCheck {
    async fn is_alive(&self, endpoint: &str) -> bool {
        match self.attempt(self.client.head(endpoint)).await {
            Ok(()) => true,
            Err(head_err) => {
                debug!(endpoint, error = %head_err, "HEAD probe failed; trying GET");
                match self.attempt(self.client.get(endpoint)).await {
                    Ok(()) => true,
                    Err(get_err) => {
                        debug!(endpoint, error = %get_err, "GET probe failed");
                        false
                    }
                }
            }
        }
    }
}

/// Public view of one dependency's health memory.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub dependency: Dependency,
    pub last_checked: Option<DateTime<Utc>>,
    pub is_healthy: bool,
}

struct HealthSlot {
    checked_at: Option<Instant>,
    checked_wall: Option<DateTime<Utc>>,
    is_healthy: bool,
}

/// Per-dependency health memory with a memoization window.
pub struct HealthProbe {
    check: Arc<dyn LivenessCheck>,
    check_interval: Duration,
    slots: HashMap<Dependency, Mutex<HealthSlot>>,
}

impl HealthProbe {
    pub fn new(check: Arc<dyn LivenessCheck>, check_interval: Duration) -> Self {
        let slots = Dependency::ALL
            .into_iter()
            .map(|dep| {
                (
                    dep,
                    Mutex::new(HealthSlot {
                        checked_at: None,
                        checked_wall: None,
                        is_healthy: true,
                    }),
                )
            })
            .collect();
        Self {
            check,
            check_interval,
            slots,
        }
    }

    /// Current belief about `dependency`, probing only when the cached value
    /// is older than the check interval. Never fails.
    pub async fn check(&self, dependency: Dependency, endpoint: Option<&str>) -> bool {
        let Some(slot) = self.slots.get(&dependency) else {
            return false;
        };
        let mut slot = slot.lock().await;

        let now = Instant::now();
        if let Some(checked_at) = slot.checked_at {
            if now.duration_since(checked_at) < self.check_interval {
                return slot.is_healthy;
            }
        }

        let healthy = match endpoint {
            Some(endpoint) => self.check.is_alive(endpoint).await,
            None => false,
        };

        if healthy != slot.is_healthy {
            if healthy {
                info!(dependency = %dependency, "Dependency recovered");
            } else {
                warn!(dependency = %dependency, endpoint = ?endpoint, "Dependency marked unhealthy");
            }
        }

        slot.is_healthy = healthy;
        // Stamped with the pre-probe instant so the value never moves backwards.
        slot.checked_at = Some(slot.checked_at.map_or(now, |prev| prev.max(now)));
        slot.checked_wall = Some(Utc::now());
        healthy
    }

    /// Snapshot of every dependency's record.
    pub async fn snapshot(&self) -> Vec<HealthRecord> {
        let mut records = Vec::with_capacity(self.slots.len());
        for dependency in Dependency::ALL {
            if let Some(slot) = self.slots.get(&dependency) {
                let slot = slot.lock().await;
                records.push(HealthRecord {
                    dependency,
                    last_checked: slot.checked_wall,
                    is_healthy: slot.is_healthy,
                });
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    struct CountingCheck {
        alive: AtomicBool,
        calls: AtomicUsize,
    }

    impl CountingCheck {
        fn new(alive: bool) -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(alive),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LivenessCheck for CountingCheck {
        async fn is_alive(&self, _endpoint: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.alive.load(Ordering::SeqCst)
        }
    }

    const URL: Option<&str> = Some("http://scanner.invalid/scan");

    #[tokio::test(start_paused = true)]
    async fn memoizes_within_interval() {
        let check = CountingCheck::new(true);
        let probe = HealthProbe::new(check.clone(), Duration::from_secs(10));

        for _ in 0..5 {
            assert!(probe.check(Dependency::Scanner, URL).await);
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(check.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reprobes_after_interval() {
        let check = CountingCheck::new(true);
        let probe = HealthProbe::new(check.clone(), Duration::from_secs(10));

        assert!(probe.check(Dependency::Mail, URL).await);
        check.alive.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(!probe.check(Dependency::Mail, URL).await);
        assert_eq!(check.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_memoized_too() {
        let check = CountingCheck::new(false);
        let probe = HealthProbe::new(check.clone(), Duration::from_secs(10));

        assert!(!probe.check(Dependency::Scanner, URL).await);
        assert!(!probe.check(Dependency::Scanner, URL).await);
        assert_eq!(check.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_failure() {
        let check = CountingCheck::new(false);
        let probe = HealthProbe::new(check.clone(), Duration::from_secs(10));

        assert!(!probe.check(Dependency::Scanner, URL).await);
        check.alive.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(probe.check(Dependency::Scanner, URL).await);
    }

    #[tokio::test(start_paused = true)]
    async fn dependencies_are_tracked_separately() {
        let check = CountingCheck::new(true);
        let probe = HealthProbe::new(check.clone(), Duration::from_secs(10));

        probe.check(Dependency::Mail, URL).await;
        probe.check(Dependency::Scanner, URL).await;
        probe.check(Dependency::Mail, URL).await;
        assert_eq!(check.calls(), 2);
    }

    #[tokio::test]
    async fn missing_endpoint_is_unhealthy_without_probing() {
        let check = CountingCheck::new(true);
        let probe = HealthProbe::new(check.clone(), Duration::from_secs(10));

        assert!(!probe.check(Dependency::Mail, None).await);
        assert_eq!(check.calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_checks_share_one_probe() {
        let check = CountingCheck::new(true);
        let probe = Arc::new(HealthProbe::new(check.clone(), Duration::from_secs(10)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let probe = Arc::clone(&probe);
                tokio::spawn(async move { probe.check(Dependency::Scanner, URL).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(check.calls(), 1);
    }

    #[tokio::test]
    async fn snapshot_reports_last_checked() {
        let check = CountingCheck::new(true);
        let probe = HealthProbe::new(check, Duration::from_secs(10));

        let before = probe.snapshot().await;
        assert!(before.iter().all(|r| r.last_checked.is_none()));

        probe.check(Dependency::Scanner, URL).await;
        let after = probe.snapshot().await;
        let scanner = after
            .iter()
            .find(|r| r.dependency == Dependency::Scanner)
            .unwrap();
        assert!(scanner.last_checked.is_some());
        assert!(scanner.is_healthy);
    }

    #[tokio::test]
    async fn http_check_reports_unreachable_endpoint_dead() {
        // Port 9 (discard) on localhost is essentially never listening.
        let check = HttpLivenessCheck::new(Duration::from_millis(200));
        assert!(!check.is_alive("http://127.0.0.1:9/").await);
    }
}
