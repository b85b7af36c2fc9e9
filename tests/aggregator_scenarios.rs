//! End-to-end scenarios exercising the full `Aggregator` pipeline against
//! scripted `MockAdapter`s: no network, real cache and registry.

use std::sync::Arc;
use std::time::Duration;

use market_data_core::providers::mock::MockAdapter;
use market_data_core::{AggregationStrategy, Aggregator, AggregatorConfig, CoreError, FallbackStrategy, ProviderAdapter, Registry};
use rust_decimal::Decimal;

fn registry_of(adapters: Vec<(Arc<MockAdapter>, f64)>, decay: f64) -> Registry {
    let entries = adapters.into_iter().map(|(a, w)| (a as Arc<dyn ProviderAdapter>, w)).collect();
    Registry::new(entries, decay)
}

#[tokio::test]
async fn fifty_concurrent_callers_trigger_exactly_one_fan_out() {
    let a = Arc::new(MockAdapter::new("a", 1.0));
    let b = Arc::new(MockAdapter::new("b", 1.0));
    a.push_price(Decimal::new(120, 0));
    b.push_price(Decimal::new(121, 0));

    let mut config = AggregatorConfig::default();
    config.min_providers = 2;
    config.max_providers = 2;
    config.min_confidence = 0.0;
    config.cache_ttl = Duration::from_secs(30);

    let registry = registry_of(vec![(a.clone(), 1.0), (b.clone(), 1.0)], config.weight_decay_factor);
    let aggregator = Arc::new(Aggregator::new(registry, config));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let aggregator = aggregator.clone();
        handles.push(tokio::spawn(async move { aggregator.get_aggregated("ADA").await }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().expect("all 50 callers should receive a result"));
    }

    let first_price = results[0].price;
    assert!(results.iter().all(|r| r.price == first_price));

    // Only the leader's fan-out should have reached the adapters.
    assert_eq!(a.health_snapshot().total_requests, 1);
    assert_eq!(b.health_snapshot().total_requests, 1);
}

#[tokio::test]
async fn low_confidence_is_quality_rejected() {
    let a = Arc::new(MockAdapter::new("a", 1.0));
    let b = Arc::new(MockAdapter::new("b", 1.0));
    a.push_price(Decimal::new(100, 0));
    b.push_price(Decimal::new(100, 0));

    let mut config = AggregatorConfig::default();
    config.min_providers = 2;
    config.max_providers = 10; // coverage = 2/10 = 0.2, well below any reasonable floor
    config.min_confidence = 0.5;
    config.enable_caching = false;

    let registry = registry_of(vec![(a, 1.0), (b, 1.0)], config.weight_decay_factor);
    let aggregator = Aggregator::new(registry, config);

    let err = aggregator.get_aggregated("DOT").await.unwrap_err();
    assert!(matches!(err, CoreError::QualityRejected(_)));
}

#[tokio::test]
async fn outlier_filter_discarded_when_it_would_breach_min_providers() {
    // min_providers = 3, and removing the one outlier would leave only 2
    // survivors. The edge policy discards the filter rather than failing.
    let a = Arc::new(MockAdapter::new("a", 1.0));
    let b = Arc::new(MockAdapter::new("b", 1.0));
    let c = Arc::new(MockAdapter::new("c", 1.0));
    a.push_price(Decimal::new(50_000, 0));
    b.push_price(Decimal::new(50_050, 0));
    c.push_price(Decimal::new(80_000, 0));

    let mut config = AggregatorConfig::default();
    config.strategy = AggregationStrategy::Median;
    config.min_providers = 3;
    config.max_providers = 3;
    config.min_confidence = 0.0;
    config.enable_caching = false;

    let registry = registry_of(vec![(a, 1.0), (b, 1.0), (c, 1.0)], config.weight_decay_factor);
    let aggregator = Aggregator::new(registry, config);

    let result = aggregator.get_aggregated("BTC").await.expect("edge policy keeps all three survivors");
    assert_eq!(result.samples.len(), 3);
    assert_eq!(result.metadata.outliers_removed, 0);
}

#[tokio::test]
async fn stale_cache_is_served_after_pipeline_failure_under_cached_fallback() {
    let a = Arc::new(MockAdapter::new("a", 1.0));
    let b = Arc::new(MockAdapter::new("b", 1.0));
    a.push_price(Decimal::new(50_000, 0));
    b.push_price(Decimal::new(50_010, 0));

    let mut config = AggregatorConfig::default();
    config.min_providers = 2;
    config.max_providers = 2;
    config.min_confidence = 0.0;
    config.enable_caching = true;
    config.cache_ttl = Duration::from_millis(5);
    config.fallback_strategy = FallbackStrategy::Cached;

    let registry = registry_of(vec![(a.clone(), 1.0), (b.clone(), 1.0)], config.weight_decay_factor);
    let aggregator = Aggregator::new(registry, config);

    let fresh = aggregator.get_aggregated("BTC").await.expect("first fan-out succeeds and populates the cache");
    assert!(!fresh.metadata.stale);

    // Let the cache entry go stale, then exhaust both adapters' queues so
    // the next fan-out fails outright and the fallback has to engage.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let served = aggregator.get_aggregated("BTC").await.expect("cached fallback should serve the stale value");
    assert_eq!(served.price, fresh.price);
    assert!(served.metadata.stale);
}
