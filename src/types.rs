//! Core data model: samples, aggregated results, and provider health snapshots.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One provider's price observation for one symbol at one instant.
///
/// Immutable once constructed; the `outlier` flag is the only field the
/// Aggregator ever sets after the fact, and it never changes the price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub latency: Duration,
    pub outlier: bool,
}

impl PriceSample {
    pub fn new(symbol: impl Into<String>, price: Decimal, provider: impl Into<String>, latency: Duration) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp: Utc::now(),
            provider: provider.into(),
            latency,
            outlier: false,
        }
    }
}

/// Metadata describing how an `AggregatedPrice` was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPriceMetadata {
    pub method: String,
    pub providers: Vec<String>,
    pub outliers_removed: usize,
    pub processing_time: Duration,
    /// Set when this result was served by the `cached` fallback past its TTL.
    pub stale: bool,
}

/// Result of combining a sample set for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub symbol: String,
    pub price: Decimal,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub samples: HashMap<String, PriceSample>,
    pub metadata: AggregatedPriceMetadata,
}

impl AggregatedPrice {
    /// Checks the invariants of §3: same symbol throughout, confidence in
    /// range, positive price, non-empty sample map, and metadata providers
    /// matching the sample keys exactly.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.samples.is_empty() {
            return Err("sample map is empty".into());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} out of range", self.confidence));
        }
        if self.price <= Decimal::ZERO {
            return Err(format!("price {} is not positive", self.price));
        }
        for (provider, sample) in &self.samples {
            if sample.symbol != self.symbol {
                return Err(format!(
                    "sample from {provider} has symbol {} but result symbol is {}",
                    sample.symbol, self.symbol
                ));
            }
        }
        let mut sample_keys: Vec<&String> = self.samples.keys().collect();
        let mut meta_providers: Vec<&String> = self.metadata.providers.iter().collect();
        sample_keys.sort();
        meta_providers.sort();
        if sample_keys != meta_providers {
            return Err("metadata.providers does not match sample map keys".into());
        }
        Ok(())
    }
}

/// Operational status of a provider, derived from its recent call history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    Healthy,
    Degraded,
    Down,
    Maintenance,
}

impl ProviderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
            Self::Maintenance => "maintenance",
        }
    }
}
