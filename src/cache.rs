//! Result Cache: a single-flight, per-entry-TTL cache of the most recently
//! computed [`AggregatedPrice`] per symbol.
//!
//! Built on `moka::future::Cache`, whose `try_get_with` already coalesces
//! concurrent misses for the same key into one init future — the leader runs
//! it, followers await the same result through moka's own per-key lock.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use tracing::debug;

use crate::error::CoreError;
use crate::types::AggregatedPrice;

struct CacheEntry {
    value: AggregatedPrice,
    written_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.written_at.elapsed() < self.ttl
    }
}

/// In-process single-flight cache of aggregated prices, keyed by symbol.
pub struct ResultCache {
    cache: Cache<String, Arc<CacheEntry>>,
    /// Last value ever computed per symbol, independent of the freshness
    /// TTL above. Never invalidated on read — only overwritten by the next
    /// successful write — so the `cached` fallback strategy has something
    /// to serve after `cache`'s own entry has expired and been evicted.
    last_good: Cache<String, Arc<AggregatedPrice>>,
}

impl ResultCache {
    /// `max_capacity` bounds distinct symbols tracked at once; `default_ttl`
    /// is moka's own global TTL, configured as a backstop behind the
    /// per-entry TTL this cache actually enforces on read.
    pub fn new(max_capacity: u64, default_ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).time_to_live(default_ttl).build();
        let last_good = Cache::builder().max_capacity(max_capacity).build();
        Self { cache, last_good }
    }

    /// Spawns a background task that nudges moka's internal maintenance at
    /// `ttl / 2`. Eviction is lazy and continuous inside moka regardless;
    /// this exists only so idle entries don't linger past their freshness
    /// window in telemetry that inspects cache size.
    pub fn spawn_sweeper(self: &Arc<Self>, ttl: Duration) {
        let cache = self.cache.clone();
        let interval = (ttl / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.run_pending_tasks().await;
            }
        });
    }

    /// Returns the cached value for `symbol` if present and still fresh.
    pub async fn get(&self, symbol: &str) -> Option<AggregatedPrice> {
        let entry = self.cache.get(symbol).await?;
        if entry.is_fresh() {
            Some(entry.value.clone())
        } else {
            self.cache.invalidate(symbol).await;
            None
        }
    }

    /// Writes `value` through unconditionally, independent of single-flight.
    pub async fn put(&self, symbol: &str, value: AggregatedPrice, ttl: Duration) {
        self.last_good.insert(symbol.to_string(), Arc::new(value.clone())).await;
        self.cache
            .insert(symbol.to_string(), Arc::new(CacheEntry { value, written_at: Instant::now(), ttl }))
            .await;
    }

    /// Stale read for the `cached` fallback strategy: returns the last value
    /// ever computed for `symbol`, however old, since `cache` itself only
    /// ever holds fresh entries. The caller is responsible for marking
    /// `metadata.stale` before returning it.
    pub async fn get_stale(&self, symbol: &str) -> Option<AggregatedPrice> {
        self.last_good.get(symbol).await.map(|value| (*value).clone())
    }

    /// Single-flight entry point. On a fresh hit, returns immediately. On a
    /// miss (or stale entry), exactly one caller runs `compute`; all
    /// concurrent callers for the same `symbol` receive the same outcome.
    pub async fn get_or_compute<F>(&self, symbol: &str, ttl: Duration, compute: F) -> Result<AggregatedPrice, Arc<CoreError>>
    where
        F: Future<Output = Result<AggregatedPrice, CoreError>>,
    {
        if let Some(fresh) = self.get(symbol).await {
            return Ok(fresh);
        }

        // A stale entry, if any, must not be handed out as the "leader's"
        // result by moka's get-or-init path, so it's evicted before entering
        // try_get_with. Two callers racing here both recompute once instead
        // of serializing; they converge on the same fresh entry afterward.
        self.cache.invalidate(symbol).await;

        let symbol_owned = symbol.to_string();
        let entry = self
            .cache
            .try_get_with(symbol_owned.clone(), async move {
                debug!(symbol = %symbol_owned, "single-flight leader computing fresh value");
                let value = compute.await?;
                Ok::<Arc<CacheEntry>, CoreError>(Arc::new(CacheEntry { value, written_at: Instant::now(), ttl }))
            })
            .await?;

        self.last_good.insert(symbol.to_string(), Arc::new(entry.value.clone())).await;
        Ok(entry.value.clone())
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.cache.invalidate(symbol).await;
        self.last_good.invalidate(symbol).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AggregatedPriceMetadata;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_price(symbol: &str) -> AggregatedPrice {
        AggregatedPrice {
            symbol: symbol.to_string(),
            price: Decimal::new(50_000, 0),
            confidence: 0.9,
            timestamp: chrono::Utc::now(),
            samples: HashMap::new(),
            metadata: AggregatedPriceMetadata {
                method: "weighted_average".to_string(),
                providers: Vec::new(),
                outliers_removed: 0,
                processing_time: Duration::from_millis(5),
                stale: false,
            },
        }
    }

    #[tokio::test]
    async fn miss_then_hit_after_put() {
        let cache = ResultCache::new(100, Duration::from_secs(60));
        assert!(cache.get("BTC").await.is_none());
        cache.put("BTC", sample_price("BTC"), Duration::from_secs(30)).await;
        assert!(cache.get("BTC").await.is_some());
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache = ResultCache::new(100, Duration::from_secs(60));
        cache.put("BTC", sample_price("BTC"), Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("BTC").await.is_none());
    }

    #[tokio::test]
    async fn stale_read_survives_ttl_expiry_and_eviction() {
        let cache = ResultCache::new(100, Duration::from_secs(60));
        cache.put("BTC", sample_price("BTC"), Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The freshness cache reads this as a miss and evicts its own entry...
        assert!(cache.get("BTC").await.is_none());
        // ...but the stale read still returns the last computed value.
        let stale = cache.get_stale("BTC").await;
        assert!(stale.is_some());
        assert_eq!(stale.unwrap().price, Decimal::new(50_000, 0));
    }

    #[tokio::test]
    async fn concurrent_get_or_compute_runs_once() {
        let cache = Arc::new(ResultCache::new(100, Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("ADA", Duration::from_secs(30), async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(sample_price("ADA"))
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
