//! Per-provider health tracking.
//!
//! Every adapter call updates this tracker: total/success/error counts, an
//! exponentially-smoothed latency, and a small ring of recent outcomes used
//! to derive `degraded` the way the rest of this codebase derives circuit
//! state from a rolling failure count, rather than a single global error rate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::ProviderStatus;

const WINDOW_SIZE: usize = 20;
const DEGRADED_SUCCESS_RATE: f64 = 0.9;
const EWMA_ALPHA: f64 = 0.3;

struct Inner {
    recent_outcomes: VecDeque<bool>,
    ewma_latency: Option<Duration>,
    status: ProviderStatus,
    last_request: Option<Instant>,
}

/// Accumulates call outcomes for one provider and derives its [`ProviderStatus`].
pub struct HealthTracker {
    inner: RwLock<Inner>,
    total: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    rate_limit_hits: AtomicU64,
    start_time: Instant,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                recent_outcomes: VecDeque::with_capacity(WINDOW_SIZE),
                ewma_latency: None,
                status: ProviderStatus::Healthy,
                last_request: None,
            }),
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of one call. `rate_limited` is tracked separately
    /// from generic failures since it reflects our own throttling, not the
    /// provider's availability.
    pub fn record(&self, success: bool, latency: Duration, rate_limited: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        if rate_limited {
            self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        }

        let mut inner = self.inner.write();
        inner.last_request = Some(Instant::now());
        inner.ewma_latency = Some(match inner.ewma_latency {
            None => latency,
            Some(prev) => {
                let prev_s = prev.as_secs_f64();
                let next_s = EWMA_ALPHA * latency.as_secs_f64() + (1.0 - EWMA_ALPHA) * prev_s;
                Duration::from_secs_f64(next_s.max(0.0))
            }
        });

        if inner.recent_outcomes.len() == WINDOW_SIZE {
            inner.recent_outcomes.pop_front();
        }
        inner.recent_outcomes.push_back(success);

        let window_success_rate = window_success_rate(&inner.recent_outcomes);
        inner.status = if window_success_rate < DEGRADED_SUCCESS_RATE && inner.recent_outcomes.len() >= 3 {
            ProviderStatus::Degraded
        } else {
            ProviderStatus::Healthy
        };
    }

    /// `ping` sets status directly: healthy on success, down on failure,
    /// bypassing the windowed degraded inference (a failed ping is decisive).
    pub fn record_ping(&self, success: bool) {
        let mut inner = self.inner.write();
        inner.status = if success { ProviderStatus::Healthy } else { ProviderStatus::Down };
        inner.last_request = Some(Instant::now());
    }

    pub fn set_maintenance(&self, in_maintenance: bool) {
        let mut inner = self.inner.write();
        inner.status = if in_maintenance { ProviderStatus::Maintenance } else { ProviderStatus::Healthy };
    }

    pub fn status(&self) -> ProviderStatus {
        self.inner.read().status
    }

    pub fn avg_latency(&self) -> Duration {
        self.inner.read().ewma_latency.unwrap_or(Duration::ZERO)
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        self.successes.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn hours_since_last_use(&self) -> f64 {
        match self.inner.read().last_request {
            Some(t) => t.elapsed().as_secs_f64() / 3600.0,
            None => f64::INFINITY,
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.read();
        HealthSnapshot {
            status: inner.status,
            avg_latency: inner.ewma_latency.unwrap_or(Duration::ZERO),
            total_requests: self.total.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            success_rate: self.success_rate(),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            last_request_secs_ago: inner.last_request.map(|t| t.elapsed().as_secs()),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

fn window_success_rate(outcomes: &VecDeque<bool>) -> f64 {
    if outcomes.is_empty() {
        return 1.0;
    }
    let successes = outcomes.iter().filter(|&&ok| ok).count();
    successes as f64 / outcomes.len() as f64
}

/// Snapshot of [`HealthTracker`] state for telemetry and Registry scoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub status: ProviderStatus,
    pub avg_latency: Duration,
    pub total_requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub success_rate: f64,
    pub rate_limit_hits: u64,
    pub last_request_secs_ago: Option<u64>,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy_with_full_success_rate() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.status(), ProviderStatus::Healthy);
        assert_eq!(tracker.success_rate(), 1.0);
    }

    #[test]
    fn degrades_after_repeated_failures() {
        let tracker = HealthTracker::new();
        for _ in 0..5 {
            tracker.record(false, Duration::from_millis(50), false);
        }
        assert_eq!(tracker.status(), ProviderStatus::Degraded);
    }

    #[test]
    fn ping_failure_marks_down_immediately() {
        let tracker = HealthTracker::new();
        tracker.record_ping(false);
        assert_eq!(tracker.status(), ProviderStatus::Down);
        tracker.record_ping(true);
        assert_eq!(tracker.status(), ProviderStatus::Healthy);
    }
}
