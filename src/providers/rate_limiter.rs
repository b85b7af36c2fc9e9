//! Token-bucket rate limiter for a single provider adapter.
//!
//! Structured the way the rest of this codebase tracks per-endpoint state:
//! a small tracker guarded by a lock, atomics for the hot counters, and a
//! `get_statistics` snapshot method returning `serde_json::Value` for
//! operator visibility. The algorithm itself is a continuous-refill token
//! bucket rather than a fixed-window counter: a burst up to `capacity`,
//! refilling at `refill_per_sec`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::sleep;

struct BucketState {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, n: f64) -> bool {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Seconds until `n` tokens will be available, assuming no further draws.
    fn wait_for(&self, n: f64) -> Duration {
        let deficit = (n - self.tokens).max(0.0);
        if self.refill_per_sec <= 0.0 {
            return Duration::from_secs(u64::MAX / 2);
        }
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }
}

/// Token-bucket rate limiter. One instance is owned per provider adapter.
pub struct TokenBucketRateLimiter {
    state: Mutex<BucketState>,
    total_requests: AtomicU64,
    total_blocked: AtomicU64,
    start_time: Instant,
}

impl TokenBucketRateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                capacity: capacity as f64,
                refill_per_sec,
                last_refill: Instant::now(),
            }),
            total_requests: AtomicU64::new(0),
            total_blocked: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Non-blocking probe: `true` if a token is available right now. Does not consume it.
    pub fn check(&self) -> bool {
        let mut state = self.state.lock();
        state.refill();
        state.tokens >= 1.0
    }

    /// Await a single token, cancellable and bounded by `deadline`. Returns
    /// `false` if the deadline elapses before a token becomes available.
    pub async fn acquire(&self, deadline: Duration) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        loop {
            let wait = {
                let mut state = self.state.lock();
                if state.try_take(1.0) {
                    return true;
                }
                state.wait_for(1.0)
            };

            if started.elapsed() >= deadline {
                self.total_blocked.fetch_add(1, Ordering::Relaxed);
                return false;
            }

            let remaining = deadline.saturating_sub(started.elapsed());
            let base_sleep = wait.min(remaining).min(Duration::from_millis(250));
            if base_sleep.is_zero() {
                self.total_blocked.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            // Jitter the wake-up so multiple callers queued on the same
            // bucket don't all retry in lockstep once it refills.
            let jitter_ms = rand::rng().random_range(0..=5);
            let sleep_for = (base_sleep + Duration::from_millis(jitter_ms)).min(remaining);
            sleep(sleep_for).await;
        }
    }

    pub fn get_statistics(&self) -> serde_json::Value {
        let total = self.total_requests.load(Ordering::Relaxed);
        let blocked = self.total_blocked.load(Ordering::Relaxed);
        let block_rate = if total > 0 { blocked as f64 / total as f64 * 100.0 } else { 0.0 };

        serde_json::json!({
            "total_requests": total,
            "total_blocked": blocked,
            "block_rate_percent": block_rate,
            "uptime_seconds": self.start_time.elapsed().as_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_then_blocks() {
        let limiter = TokenBucketRateLimiter::new(2, 1.0);
        assert!(limiter.acquire(Duration::from_millis(10)).await);
        assert!(limiter.acquire(Duration::from_millis(10)).await);
        // Bucket is now empty; a short deadline should time out.
        assert!(!limiter.acquire(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = TokenBucketRateLimiter::new(1, 20.0);
        assert!(limiter.acquire(Duration::from_millis(10)).await);
        // At 20 tokens/sec a single token refills in 50ms; give it margin.
        assert!(limiter.acquire(Duration::from_millis(200)).await);
    }

    #[test]
    fn check_does_not_consume() {
        let limiter = TokenBucketRateLimiter::new(1, 1.0);
        assert!(limiter.check());
        assert!(limiter.check());
    }
}
