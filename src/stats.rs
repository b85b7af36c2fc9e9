//! Stats Accumulator: per-provider and global counters feeding the Registry's
//! adaptive weighting and operator telemetry.
//!
//! An `RwLock<HashMap<String, _>>` of per-key state is the mutation
//! boundary, with `AtomicU64` globals updated once per request and a
//! `serde_json::Value` snapshot method.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

#[derive(Debug, Clone)]
struct ProviderStats {
    requests: u64,
    successes: u64,
    errors: u64,
    outlier_occurrences: u64,
    ewma_latency: Option<Duration>,
    last_used: Option<Instant>,
}

impl ProviderStats {
    fn new() -> Self {
        Self { requests: 0, successes: 0, errors: 0, outlier_occurrences: 0, ewma_latency: None, last_used: None }
    }

    fn reliability(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }
}

/// Per-provider and global counters accumulated over the life of an Aggregator.
pub struct StatsAccumulator {
    providers: RwLock<HashMap<String, ProviderStats>>,
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    outliers_detected: AtomicU64,
    confidence_sum_milli: AtomicU64,
    confidence_samples: AtomicU64,
    start_time: Instant,
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            outliers_detected: AtomicU64::new(0),
            confidence_sum_milli: AtomicU64::new(0),
            confidence_samples: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_provider_call(&self, provider: &str, success: bool, latency: Duration) {
        let mut providers = self.providers.write();
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderStats::new);
        entry.requests += 1;
        if success {
            entry.successes += 1;
        } else {
            entry.errors += 1;
        }
        entry.last_used = Some(Instant::now());
        entry.ewma_latency = Some(match entry.ewma_latency {
            None => latency,
            Some(prev) => Duration::from_secs_f64(0.3 * latency.as_secs_f64() + 0.7 * prev.as_secs_f64()),
        });
    }

    pub fn record_provider_outlier(&self, provider: &str) {
        let mut providers = self.providers.write();
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderStats::new);
        entry.outlier_occurrences += 1;
        self.outliers_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confidence(&self, confidence: f64) {
        self.confidence_sum_milli.fetch_add((confidence * 1000.0) as u64, Ordering::Relaxed);
        self.confidence_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_reliability(&self, provider: &str) -> f64 {
        self.providers.read().get(provider).map(ProviderStats::reliability).unwrap_or(1.0)
    }

    pub fn get_statistics(&self) -> serde_json::Value {
        let providers = self.providers.read();
        let provider_snapshot: serde_json::Map<String, serde_json::Value> = providers
            .iter()
            .map(|(name, stats)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "requests": stats.requests,
                        "successes": stats.successes,
                        "errors": stats.errors,
                        "outlier_occurrences": stats.outlier_occurrences,
                        "reliability": stats.reliability(),
                        "avg_latency_ms": stats.ewma_latency.unwrap_or(Duration::ZERO).as_millis(),
                    }),
                )
            })
            .collect();

        let confidence_samples = self.confidence_samples.load(Ordering::Relaxed);
        let avg_confidence = if confidence_samples == 0 {
            0.0
        } else {
            self.confidence_sum_milli.load(Ordering::Relaxed) as f64 / 1000.0 / confidence_samples as f64
        };

        serde_json::json!({
            "total_requests": self.total_requests.load(Ordering::Relaxed),
            "total_successes": self.total_successes.load(Ordering::Relaxed),
            "total_failures": self.total_failures.load(Ordering::Relaxed),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "cache_misses": self.cache_misses.load(Ordering::Relaxed),
            "outliers_detected": self.outliers_detected.load(Ordering::Relaxed),
            "average_confidence": avg_confidence,
            "uptime_seconds": self.start_time.elapsed().as_secs(),
            "providers": provider_snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_defaults_to_one_for_unused_provider() {
        let stats = StatsAccumulator::new();
        assert_eq!(stats.provider_reliability("binance"), 1.0);
    }

    #[test]
    fn reliability_reflects_recorded_outcomes() {
        let stats = StatsAccumulator::new();
        stats.record_provider_call("binance", true, Duration::from_millis(50));
        stats.record_provider_call("binance", false, Duration::from_millis(50));
        assert_eq!(stats.provider_reliability("binance"), 0.5);
    }

    #[test]
    fn snapshot_reports_global_counters() {
        let stats = StatsAccumulator::new();
        stats.record_request(true);
        stats.record_cache_hit();
        let snapshot = stats.get_statistics();
        assert_eq!(snapshot["total_requests"], 1);
        assert_eq!(snapshot["cache_hits"], 1);
    }
}
