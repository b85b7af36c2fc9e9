//! Typed configuration surface for the aggregation core.
//!
//! Values are read from environment variables (optionally loaded from a
//! `.env` file via `dotenvy`) with documented defaults, then converted into
//! the typed fields the rest of the crate consumes — durations become
//! `Duration`, never a raw integer past this boundary.

use std::time::Duration;

use crate::aggregator::{AggregationStrategy, FallbackStrategy};
use crate::outlier::OutlierMethod;

/// Full configuration for an `Aggregator` instance.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub strategy: AggregationStrategy,
    pub outlier_method: OutlierMethod,
    pub outlier_threshold: f64,
    pub min_providers: usize,
    pub max_providers: usize,
    pub weight_by_latency: bool,
    pub weight_by_reliability: bool,
    pub weight_decay_factor: f64,
    pub max_price_deviation_pct: f64,
    pub min_confidence: f64,
    pub require_quorum: bool,
    pub cache_ttl: Duration,
    pub enable_caching: bool,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub fallback_strategy: FallbackStrategy,
    pub fallback_provider: Option<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            strategy: AggregationStrategy::WeightedAverage,
            outlier_method: OutlierMethod::ZScore,
            outlier_threshold: 2.0,
            min_providers: 2,
            max_providers: 5,
            weight_by_latency: true,
            weight_by_reliability: true,
            weight_decay_factor: 0.1,
            max_price_deviation_pct: 5.0,
            min_confidence: 0.5,
            require_quorum: false,
            cache_ttl: Duration::from_secs(30),
            enable_caching: true,
            max_concurrency: 10,
            request_timeout: Duration::from_secs(10),
            fallback_strategy: FallbackStrategy::Error,
            fallback_provider: None,
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from environment variables, falling back to
    /// [`AggregatorConfig::default`] for anything unset or unparseable.
    ///
    /// Recognized variables: `MARKET_DATA_STRATEGY`, `MARKET_DATA_OUTLIER_METHOD`,
    /// `MARKET_DATA_OUTLIER_THRESHOLD`, `MARKET_DATA_MIN_PROVIDERS`,
    /// `MARKET_DATA_MAX_PROVIDERS`, `MARKET_DATA_MAX_DEVIATION_PCT`,
    /// `MARKET_DATA_MIN_CONFIDENCE`, `MARKET_DATA_REQUIRE_QUORUM`,
    /// `MARKET_DATA_CACHE_TTL_SECS`, `MARKET_DATA_ENABLE_CACHING`,
    /// `MARKET_DATA_MAX_CONCURRENCY`, `MARKET_DATA_REQUEST_TIMEOUT_SECS`,
    /// `MARKET_DATA_FALLBACK_STRATEGY`, `MARKET_DATA_FALLBACK_PROVIDER`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Self {
            strategy: env_parse("MARKET_DATA_STRATEGY", defaults.strategy, |s| {
                AggregationStrategy::parse(s)
            }),
            outlier_method: env_parse("MARKET_DATA_OUTLIER_METHOD", defaults.outlier_method, |s| {
                OutlierMethod::parse(s)
            }),
            outlier_threshold: env_parse_num("MARKET_DATA_OUTLIER_THRESHOLD", defaults.outlier_threshold),
            min_providers: env_parse_num("MARKET_DATA_MIN_PROVIDERS", defaults.min_providers),
            max_providers: env_parse_num("MARKET_DATA_MAX_PROVIDERS", defaults.max_providers),
            weight_by_latency: env_parse_num("MARKET_DATA_WEIGHT_BY_LATENCY", defaults.weight_by_latency as u8) != 0,
            weight_by_reliability: env_parse_num(
                "MARKET_DATA_WEIGHT_BY_RELIABILITY",
                defaults.weight_by_reliability as u8,
            ) != 0,
            weight_decay_factor: env_parse_num("MARKET_DATA_WEIGHT_DECAY_FACTOR", defaults.weight_decay_factor),
            max_price_deviation_pct: env_parse_num(
                "MARKET_DATA_MAX_DEVIATION_PCT",
                defaults.max_price_deviation_pct,
            ),
            min_confidence: env_parse_num("MARKET_DATA_MIN_CONFIDENCE", defaults.min_confidence),
            require_quorum: env_parse_num("MARKET_DATA_REQUIRE_QUORUM", defaults.require_quorum as u8) != 0,
            cache_ttl: Duration::from_secs(env_parse_num(
                "MARKET_DATA_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )),
            enable_caching: env_parse_num("MARKET_DATA_ENABLE_CACHING", defaults.enable_caching as u8) != 0,
            max_concurrency: env_parse_num("MARKET_DATA_MAX_CONCURRENCY", defaults.max_concurrency),
            request_timeout: Duration::from_secs(env_parse_num(
                "MARKET_DATA_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            fallback_strategy: env_parse("MARKET_DATA_FALLBACK_STRATEGY", defaults.fallback_strategy, |s| {
                FallbackStrategy::parse(s)
            }),
            fallback_provider: std::env::var("MARKET_DATA_FALLBACK_PROVIDER").ok(),
        }
    }
}

fn env_parse_num<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_parse<T: Copy>(key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    std::env::var(key).ok().as_deref().and_then(parse).unwrap_or(default)
}

/// Per-adapter construction parameters (base weight, HTTP timeouts, rate limit).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_weight: f64,
    pub connect_timeout: Duration,
    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: u32,
    pub api_key: Option<String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, base_weight: f64, rate_limit_per_sec: f64, rate_limit_burst: u32) -> Self {
        Self {
            name: name.into(),
            base_weight,
            connect_timeout: Duration::from_secs(10),
            rate_limit_per_sec,
            rate_limit_burst,
            api_key: None,
        }
    }
}
