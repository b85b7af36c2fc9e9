//! Aggregator: fans out to selected providers, filters outliers, combines the
//! survivors, scores confidence, validates, and publishes through the cache.
//! This is the component the rest of the crate exists to support.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cache::ResultCache;
use crate::config::AggregatorConfig;
use crate::error::{CoreError, CoreResult, QualityRejection};
use crate::outlier;
use crate::providers::ProviderAdapter;
use crate::registry::Registry;
use crate::stats::StatsAccumulator;
use crate::types::{AggregatedPrice, AggregatedPriceMetadata, PriceSample};

/// How the Aggregator combines the surviving samples into one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStrategy {
    WeightedAverage,
    Median,
    BestPrice,
}

impl AggregationStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "weighted_average" | "weighted-average" => Some(Self::WeightedAverage),
            "median" => Some(Self::Median),
            "best_price" | "best-price" => Some(Self::BestPrice),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::WeightedAverage => "weighted_average",
            Self::Median => "median",
            Self::BestPrice => "best_price",
        }
    }
}

/// What to do when a request cannot be satisfied from a live fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    Cached,
    SingleProvider,
    Error,
}

impl FallbackStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cached" => Some(Self::Cached),
            "single_provider" | "single-provider" => Some(Self::SingleProvider),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Ties together a Registry, a Result Cache, and a Stats Accumulator behind
/// the public `get_aggregated` / `get_batch` contract.
pub struct Aggregator {
    registry: Registry,
    cache: Arc<ResultCache>,
    stats: StatsAccumulator,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(registry: Registry, config: AggregatorConfig) -> Self {
        let cache = Arc::new(ResultCache::new(10_000, config.cache_ttl));
        if config.enable_caching {
            cache.spawn_sweeper(config.cache_ttl);
        }
        Self { registry, cache, stats: StatsAccumulator::new(), config }
    }

    pub fn stats(&self) -> &StatsAccumulator {
        &self.stats
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn validate_symbol(symbol: &str) -> CoreResult<()> {
        if symbol.is_empty() || symbol.len() > 20 || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::BadRequest(format!("invalid symbol: {symbol}")));
        }
        Ok(())
    }

    /// Full pipeline for one symbol: cache probe, selection, fan-out,
    /// outlier filtering, combine, confidence, validation, publish.
    #[tracing::instrument(skip(self, symbol), fields(symbol = %symbol))]
    pub async fn get_aggregated(&self, symbol: &str) -> CoreResult<AggregatedPrice> {
        Self::validate_symbol(symbol)?;
        let upper = symbol.to_ascii_uppercase();

        if self.config.enable_caching {
            if let Some(cached) = self.cache.get(&upper).await {
                debug!(symbol = %upper, "cache hit");
                self.stats.record_cache_hit();
                return Ok(cached);
            }
            debug!(symbol = %upper, "cache miss");
            self.stats.record_cache_miss();
        }

        let result = if self.config.enable_caching {
            self.cache
                .get_or_compute(&upper, self.config.cache_ttl, self.run_pipeline(upper.clone()))
                .await
                .map_err(|arc_err| (*arc_err).clone())
        } else {
            self.run_pipeline(upper.clone()).await
        };

        match result {
            Ok(price) => {
                info!(symbol = %upper, confidence = price.confidence, providers = price.metadata.providers.len(), "aggregated price published");
                self.stats.record_request(true);
                self.stats.record_confidence(price.confidence);
                Ok(price)
            }
            Err(e) => {
                match &e {
                    CoreError::QualityRejected(_) | CoreError::AggregationError(_) => {
                        error!(symbol = %upper, error = %e, "data-quality incident");
                    }
                    _ => warn!(symbol = %upper, error = %e, "pipeline failed"),
                }
                self.stats.record_request(false);
                self.apply_fallback(&upper, e).await
            }
        }
    }

    async fn apply_fallback(&self, symbol: &str, error: CoreError) -> CoreResult<AggregatedPrice> {
        match self.config.fallback_strategy {
            FallbackStrategy::Error => Err(error),
            FallbackStrategy::Cached => match self.cache.get_stale(symbol).await {
                Some(mut stale) => {
                    warn!(symbol = %symbol, "serving stale cached price after pipeline failure");
                    stale.metadata.stale = true;
                    Ok(stale)
                }
                None => Err(error),
            },
            FallbackStrategy::SingleProvider => {
                let Some(preferred_name) = &self.config.fallback_provider else {
                    return Err(error);
                };
                let Some(adapter) = self.registry.all().into_iter().find(|a| a.name() == preferred_name) else {
                    return Err(error);
                };
                match adapter.get_price(symbol, self.config.request_timeout).await {
                    Ok(sample) => Ok(self.single_sample_result(symbol, sample)),
                    Err(_) => Err(error),
                }
            }
        }
    }

    fn single_sample_result(&self, symbol: &str, sample: PriceSample) -> AggregatedPrice {
        let mut samples = HashMap::new();
        samples.insert(sample.provider.clone(), sample.clone());
        AggregatedPrice {
            symbol: symbol.to_string(),
            price: sample.price,
            confidence: 1.0 / self.config.max_providers as f64,
            timestamp: chrono::Utc::now(),
            samples,
            metadata: AggregatedPriceMetadata {
                method: "single_provider_fallback".to_string(),
                providers: vec![sample.provider],
                outliers_removed: 0,
                processing_time: Duration::ZERO,
                stale: false,
            },
        }
    }

    async fn run_pipeline(&self, symbol: String) -> CoreResult<AggregatedPrice> {
        let started = Instant::now();

        let healthy = self.registry.healthy();
        if healthy.len() < self.config.min_providers {
            return Err(CoreError::InsufficientProviders { healthy: healthy.len(), required: self.config.min_providers });
        }
        let selected = self.registry.select(self.config.max_providers);

        let deadline = self.config.request_timeout;
        let fetches = selected.iter().map(|adapter| {
            let adapter = adapter.clone();
            let symbol = symbol.clone();
            async move {
                let attempt_start = Instant::now();
                let result = tokio::time::timeout(deadline, adapter.get_price(&symbol, deadline)).await;
                (adapter.name().to_string(), attempt_start.elapsed(), result)
            }
        });

        let outcomes = tokio::time::timeout(deadline, futures::future::join_all(fetches))
            .await
            .unwrap_or_default();

        let mut survivors: Vec<PriceSample> = Vec::new();
        for (provider, latency, outcome) in outcomes {
            match outcome {
                Ok(Ok(sample)) => {
                    self.stats.record_provider_call(&provider, true, latency);
                    survivors.push(sample);
                }
                Ok(Err(provider_error)) => {
                    warn!(provider = %provider, error = %provider_error, "provider call failed");
                    self.stats.record_provider_call(&provider, false, latency);
                }
                Err(_) => {
                    warn!(provider = %provider, "provider call timed out");
                    self.stats.record_provider_call(&provider, false, latency);
                }
            }
        }

        if survivors.len() < self.config.min_providers {
            return Err(CoreError::InsufficientResponses { responses: survivors.len(), required: self.config.min_providers });
        }

        let survivor_count = survivors.len();
        let (filtered, outliers_removed) = self.filter_outliers(survivors);

        let aggregated_price = self.combine(&filtered, self.config.strategy)?;
        let confidence = self.confidence(&filtered, aggregated_price);

        self.validate(&filtered, aggregated_price, confidence, survivor_count)?;

        let mut providers: Vec<String> = filtered.iter().map(|s| s.provider.clone()).collect();
        providers.sort();

        let samples = filtered.into_iter().map(|s| (s.provider.clone(), s)).collect();

        let result = AggregatedPrice {
            symbol,
            price: aggregated_price,
            confidence,
            timestamp: chrono::Utc::now(),
            samples,
            metadata: AggregatedPriceMetadata {
                method: self.config.strategy.as_str().to_string(),
                providers,
                outliers_removed,
                processing_time: started.elapsed(),
                stale: false,
            },
        };

        if let Err(reason) = result.check_invariants() {
            return Err(CoreError::AggregationError(reason));
        }

        Ok(result)
    }

    /// Applies the Outlier Detector and the §4.C edge policy: discard the
    /// filter entirely if it would drop survivors below `min_providers`.
    /// Returns the surviving samples and how many were actually removed.
    fn filter_outliers(&self, mut survivors: Vec<PriceSample>) -> (Vec<PriceSample>, usize) {
        let values: Vec<f64> = survivors.iter().filter_map(|s| s.price.to_f64()).collect();
        if values.len() != survivors.len() {
            // Non-finite price somewhere; skip filtering rather than risk misalignment.
            return (survivors, 0);
        }

        let outlier_indices = outlier::detect(&values, self.config.outlier_method, self.config.outlier_threshold);
        if outlier_indices.is_empty() {
            return (survivors, 0);
        }

        let would_survive = survivors.len() - outlier_indices.len();
        let outlier_set: std::collections::HashSet<usize> = outlier_indices.into_iter().collect();

        if would_survive < self.config.min_providers {
            for (i, sample) in survivors.iter().enumerate() {
                if outlier_set.contains(&i) {
                    self.stats.record_provider_outlier(&sample.provider);
                }
            }
            return (survivors, 0);
        }

        let mut filtered = Vec::with_capacity(would_survive);
        let mut removed = 0;
        for (i, mut sample) in survivors.drain(..).enumerate() {
            if outlier_set.contains(&i) {
                self.stats.record_provider_outlier(&sample.provider);
                sample.outlier = true;
                removed += 1;
            } else {
                filtered.push(sample);
            }
        }
        (filtered, removed)
    }

    fn combine(&self, filtered: &[PriceSample], strategy: AggregationStrategy) -> CoreResult<Decimal> {
        match strategy {
            AggregationStrategy::WeightedAverage => {
                let weights = self.registry.weights();
                let mut total_weight = Decimal::ZERO;
                let mut weighted_sum = Decimal::ZERO;
                for sample in filtered {
                    let weight = weights.get(&sample.provider).copied().unwrap_or(1.0);
                    let weight_decimal = Decimal::try_from(weight).unwrap_or(Decimal::ONE);
                    weighted_sum += sample.price * weight_decimal;
                    total_weight += weight_decimal;
                }
                if total_weight == Decimal::ZERO {
                    return Err(CoreError::AggregationError("zero total weight across survivors".to_string()));
                }
                Ok(weighted_sum / total_weight)
            }
            AggregationStrategy::Median => Ok(median_decimal(filtered)),
            AggregationStrategy::BestPrice => {
                filtered
                    .iter()
                    .min_by(|a, b| a.latency.cmp(&b.latency))
                    .map(|s| s.price)
                    .ok_or_else(|| CoreError::AggregationError("no survivors to select from".to_string()))
            }
        }
    }

    /// `coverage × tightness`, clamped to `[0, 1]`.
    fn confidence(&self, filtered: &[PriceSample], aggregated: Decimal) -> f64 {
        let coverage = (filtered.len() as f64 / self.config.max_providers as f64).min(1.0);

        let aggregated_f64 = aggregated.to_f64().unwrap_or(0.0);
        if filtered.len() < 2 || aggregated_f64 == 0.0 {
            return coverage.clamp(0.0, 1.0);
        }

        let variance = filtered
            .iter()
            .map(|s| {
                let price = s.price.to_f64().unwrap_or(aggregated_f64);
                (price - aggregated_f64).powi(2)
            })
            .sum::<f64>()
            / (filtered.len() - 1) as f64;

        let cv = variance.sqrt() / aggregated_f64;
        let tightness = 1.0 / (1.0 + cv);

        (coverage * tightness).clamp(0.0, 1.0)
    }

    fn validate(&self, filtered: &[PriceSample], aggregated: Decimal, confidence: f64, survivor_count: usize) -> CoreResult<()> {
        if confidence < self.config.min_confidence {
            return Err(CoreError::QualityRejected(QualityRejection::LowConfidence {
                confidence,
                min_confidence: self.config.min_confidence,
            }));
        }

        let median = median_decimal(filtered);
        if median != Decimal::ZERO {
            let deviation_pct = ((aggregated - median) / median * Decimal::from(100)).abs();
            let deviation_f64 = deviation_pct.to_f64().unwrap_or(0.0);
            if deviation_f64 > self.config.max_price_deviation_pct {
                return Err(CoreError::QualityRejected(QualityRejection::ExcessiveDeviation {
                    deviation_pct: deviation_f64,
                    max_pct: self.config.max_price_deviation_pct,
                }));
            }
        }

        if self.config.require_quorum {
            let quorum = survivor_count / 2 + 1;
            if filtered.len() < quorum {
                return Err(CoreError::QualityRejected(QualityRejection::NoQuorum {
                    filtered: filtered.len(),
                    survivors: survivor_count,
                }));
            }
        }

        Ok(())
    }

    /// Runs `get_aggregated` for each symbol concurrently, bounded by a
    /// semaphore of `max_concurrency`. Per-symbol failures are absent from
    /// the result map rather than failing the whole batch.
    #[tracing::instrument(skip(self, symbols), fields(batch_size = symbols.len()))]
    pub async fn get_batch(&self, symbols: &[String]) -> CoreResult<HashMap<String, AggregatedPrice>> {
        if symbols.is_empty() {
            return Err(CoreError::BadRequest("batch symbol list is empty".to_string()));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let futures = symbols.iter().map(|symbol| {
            let semaphore = semaphore.clone();
            let symbol = symbol.clone();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                self.get_aggregated(&symbol).await.ok().map(|price| (symbol, price))
            }
        });

        let results: HashMap<String, AggregatedPrice> = futures::future::join_all(futures).await.into_iter().flatten().collect();

        info!(requested = symbols.len(), succeeded = results.len(), "batch aggregation finished");

        if results.is_empty() {
            return Err(CoreError::BadRequest("no symbols in the batch produced a result".to_string()));
        }

        Ok(results)
    }
}

fn median_decimal(samples: &[PriceSample]) -> Decimal {
    if samples.is_empty() {
        return Decimal::ZERO;
    }
    let mut prices: Vec<Decimal> = samples.iter().map(|s| s.price).collect();
    prices.sort();
    let n = prices.len();
    if n % 2 == 0 {
        (prices[n / 2 - 1] + prices[n / 2]) / Decimal::from(2)
    } else {
        prices[n / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockAdapter;
    use std::sync::Arc as StdArc;

    fn build_aggregator(adapters: Vec<(StdArc<MockAdapter>, f64)>, config: AggregatorConfig) -> Aggregator {
        let registry_adapters = adapters
            .into_iter()
            .map(|(a, w)| (a as StdArc<dyn ProviderAdapter>, w))
            .collect();
        let registry = Registry::new(registry_adapters, config.weight_decay_factor);
        Aggregator::new(registry, config)
    }

    #[tokio::test]
    async fn happy_path_weighted_average_matches_confidence() {
        let a = StdArc::new(MockAdapter::new("a", 1.0));
        let b = StdArc::new(MockAdapter::new("b", 1.0));
        let c = StdArc::new(MockAdapter::new("c", 1.0));
        a.push_price(Decimal::new(50_000, 0));
        b.push_price(Decimal::new(50_100, 0));
        c.push_price(Decimal::new(49_900, 0));

        let mut config = AggregatorConfig::default();
        config.min_providers = 2;
        config.max_providers = 5;
        config.enable_caching = false;
        config.min_confidence = 0.0;

        let aggregator = build_aggregator(vec![(a, 1.0), (b, 1.0), (c, 1.0)], config);
        let result = aggregator.get_aggregated("BTC").await.unwrap();

        assert_eq!(result.price, Decimal::new(50_000, 0));
        assert!((result.confidence - 0.599).abs() < 0.01);
    }

    #[tokio::test]
    async fn insufficient_providers_fails_before_fan_out() {
        let a = StdArc::new(MockAdapter::new("a", 1.0));
        let mut config = AggregatorConfig::default();
        config.min_providers = 3;
        config.enable_caching = false;

        let aggregator = build_aggregator(vec![(a, 1.0)], config);
        let err = aggregator.get_aggregated("BTC").await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientProviders { .. }));
    }

    #[tokio::test]
    async fn outlier_is_excluded_under_median_strategy() {
        // Six providers so the outlier's own pull on mean/stdev can't mask
        // itself below the default z-score threshold (see outlier.rs tests).
        let a = StdArc::new(MockAdapter::new("a", 1.0));
        let b = StdArc::new(MockAdapter::new("b", 1.0));
        let c = StdArc::new(MockAdapter::new("c", 1.0));
        let d = StdArc::new(MockAdapter::new("d", 1.0));
        let e = StdArc::new(MockAdapter::new("e", 1.0));
        let f = StdArc::new(MockAdapter::new("f", 1.0));
        a.push_price(Decimal::new(50_000, 0));
        b.push_price(Decimal::new(50_050, 0));
        c.push_price(Decimal::new(49_980, 0));
        d.push_price(Decimal::new(50_020, 0));
        e.push_price(Decimal::new(49_995, 0));
        f.push_price(Decimal::new(80_000, 0));

        let mut config = AggregatorConfig::default();
        config.strategy = AggregationStrategy::Median;
        config.min_providers = 2;
        config.max_providers = 6;
        config.enable_caching = false;
        config.min_confidence = 0.0;

        let aggregator =
            build_aggregator(vec![(a, 1.0), (b, 1.0), (c, 1.0), (d, 1.0), (e, 1.0), (f, 1.0)], config);
        let result = aggregator.get_aggregated("BTC").await.unwrap();
        assert_eq!(result.metadata.outliers_removed, 1);
        assert_eq!(result.price, Decimal::new(50_000, 0));
    }

    #[tokio::test]
    async fn cache_hit_avoids_second_fan_out() {
        let a = StdArc::new(MockAdapter::new("a", 1.0));
        let b = StdArc::new(MockAdapter::new("b", 1.0));
        a.push_price(Decimal::new(3000, 0));
        b.push_price(Decimal::new(3010, 0));

        let mut config = AggregatorConfig::default();
        config.min_providers = 2;
        config.max_providers = 2;
        config.min_confidence = 0.0;
        config.cache_ttl = Duration::from_secs(30);

        let aggregator = build_aggregator(vec![(a, 1.0), (b, 1.0)], config);
        let first = aggregator.get_aggregated("ETH").await.unwrap();
        let second = aggregator.get_aggregated("ETH").await.unwrap();
        assert_eq!(first.price, second.price);
        assert_eq!(aggregator.stats().get_statistics()["cache_hits"], 1);
    }

    #[tokio::test]
    async fn quorum_rejects_when_outlier_removal_drops_below_survivor_majority() {
        // Seven providers, symmetric low/high extremes tight enough under a
        // low IQR multiplier to remove four of them, leaving three survivors
        // against a pre-filter majority of four (7 / 2 + 1).
        let a = StdArc::new(MockAdapter::new("a", 1.0));
        let b = StdArc::new(MockAdapter::new("b", 1.0));
        let c = StdArc::new(MockAdapter::new("c", 1.0));
        let d = StdArc::new(MockAdapter::new("d", 1.0));
        let e = StdArc::new(MockAdapter::new("e", 1.0));
        let f = StdArc::new(MockAdapter::new("f", 1.0));
        let g = StdArc::new(MockAdapter::new("g", 1.0));
        a.push_price(Decimal::new(-1000, 0));
        b.push_price(Decimal::new(-900, 0));
        c.push_price(Decimal::new(100, 0));
        d.push_price(Decimal::new(101, 0));
        e.push_price(Decimal::new(102, 0));
        f.push_price(Decimal::new(900, 0));
        g.push_price(Decimal::new(1000, 0));

        let mut config = AggregatorConfig::default();
        config.strategy = AggregationStrategy::Median;
        config.outlier_method = crate::outlier::OutlierMethod::Iqr;
        config.outlier_threshold = 0.3;
        config.min_providers = 2;
        config.max_providers = 7;
        config.enable_caching = false;
        config.min_confidence = 0.0;
        config.require_quorum = true;

        let aggregator = build_aggregator(
            vec![(a, 1.0), (b, 1.0), (c, 1.0), (d, 1.0), (e, 1.0), (f, 1.0), (g, 1.0)],
            config,
        );
        let err = aggregator.get_aggregated("BTC").await.unwrap_err();
        match err {
            CoreError::QualityRejected(QualityRejection::NoQuorum { filtered, survivors }) => {
                assert_eq!(filtered, 3);
                assert_eq!(survivors, 7);
            }
            other => panic!("expected NoQuorum rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_partial_failure_omits_failed_symbol() {
        let a = StdArc::new(MockAdapter::new("a", 1.0));
        let b = StdArc::new(MockAdapter::new("b", 1.0));
        a.push_price(Decimal::new(50_000, 0));
        a.push_price(Decimal::new(3_000, 0));
        b.push_price(Decimal::new(50_010, 0));
        b.push_price(Decimal::new(3_010, 0));

        let mut config = AggregatorConfig::default();
        config.min_providers = 2;
        config.max_providers = 2;
        config.min_confidence = 0.0;
        config.enable_caching = false;

        let aggregator = build_aggregator(vec![(a, 1.0), (b, 1.0)], config);
        let symbols = vec!["BTC".to_string(), "ETH".to_string(), "INVALIDSYMBOL!".to_string()];
        let result = aggregator.get_batch(&symbols).await.unwrap();

        assert_eq!(result.len(), 2);
        assert!(result.contains_key("BTC"));
        assert!(result.contains_key("ETH"));
    }
}
