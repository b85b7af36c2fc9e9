//! Multi-provider cryptocurrency price aggregation core.
//!
//! Fans out to a configured set of [`providers::ProviderAdapter`]s, rejects
//! statistical outliers, combines the survivors into one price with a
//! confidence score, and serves repeat requests from a single-flight
//! [`cache::ResultCache`]. See [`aggregator::Aggregator`] for the entry point.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod outlier;
pub mod providers;
pub mod registry;
pub mod stats;
pub mod types;

pub use aggregator::{Aggregator, AggregationStrategy, FallbackStrategy};
pub use cache::ResultCache;
pub use config::{AggregatorConfig, ProviderConfig};
pub use error::{CoreError, CoreResult, QualityRejection};
pub use outlier::OutlierMethod;
pub use providers::{ProviderAdapter, ProviderError, ProviderErrorKind};
pub use registry::Registry;
pub use types::{AggregatedPrice, AggregatedPriceMetadata, PriceSample, ProviderStatus};
