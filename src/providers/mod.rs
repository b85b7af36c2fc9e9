//! Provider Adapter: a uniform capability set over one upstream price source.
//!
//! Each upstream (Binance, Coinbase, CoinGecko, ...) implements
//! [`ProviderAdapter`] as a variant with identical surface and
//! provider-specific mapping inside. Operations an upstream genuinely cannot
//! perform (CoinGecko has no order book) fail with `ProviderErrorKind::Unsupported`
//! rather than being absent from the trait.

mod binance;
mod coinbase;
mod coingecko;
pub mod health;
pub mod mock;
pub mod normalize;
pub mod rate_limiter;

pub use binance::BinanceAdapter;
pub use coinbase::CoinbaseAdapter;
pub use coingecko::CoinGeckoAdapter;
pub use health::{HealthSnapshot, HealthTracker};
pub use rate_limiter::TokenBucketRateLimiter;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::PriceSample;

/// Taxonomy of failures a provider call can produce (§4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    Unauthorized,
    NotFound,
    BadRequest,
    ServerError,
    Timeout,
    NetworkError,
    InvalidSymbol,
    NoData,
    Maintenance,
    Unsupported,
}

impl ProviderErrorKind {
    /// Whether a caller may reasonably retry this class of failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Timeout | Self::NetworkError | Self::Maintenance
        )
    }
}

/// A single failed provider call, carrying enough context for the Aggregator
/// to decide whether to drop the provider from this request only, or mark it
/// unhealthy for future selection.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub code: Option<String>,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind.is_retryable();
        Self {
            provider: provider.into(),
            kind,
            code: None,
            message: message.into(),
            retryable,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:?}{}]: {}",
            self.provider,
            self.kind,
            self.code.as_deref().map(|c| format!(" {c}")).unwrap_or_default(),
            self.message
        )
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// A single level-2 order book side entry: (price, size).
pub type BookLevel = (Decimal, Decimal);

/// A snapshot of bids/asks to the requested depth.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A single OHLCV candle.
#[derive(Debug, Clone)]
pub struct Candle {
    pub open_time: chrono::DateTime<chrono::Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Coarse market snapshot (used by `get_market_data`).
#[derive(Debug, Clone)]
pub struct MarketData {
    pub symbol: String,
    pub price: Decimal,
    pub volume_24h: Decimal,
    pub change_24h_pct: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Candle granularity for `get_historical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    SixHours,
    OneDay,
}

impl Interval {
    pub fn as_seconds(self) -> u64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::OneHour => 3600,
            Self::SixHours => 21_600,
            Self::OneDay => 86_400,
        }
    }
}

/// Uniform capability set over one upstream price source.
///
/// Implementors own their HTTP client, rate limiter, and health tracker.
/// Every method is handed a caller-controlled deadline; implementations must
/// respect it via `tokio::time::timeout` rather than looping indefinitely.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identity used as the key in the `Registry` and in sample/metadata maps.
    fn name(&self) -> &str;

    /// Fetch the current price for a canonical symbol (e.g. `BTC`).
    async fn get_price(&self, symbol: &str, deadline: Duration) -> ProviderResult<PriceSample>;

    /// Fetch current prices for a set of canonical symbols. Default
    /// implementation fans out sequentially; adapters with native
    /// multi-symbol endpoints should override this.
    async fn get_prices(&self, symbols: &[String], deadline: Duration) -> Vec<ProviderResult<PriceSample>> {
        let mut out = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            out.push(self.get_price(symbol, deadline).await);
        }
        out
    }

    /// Fetch historical candles. Out of the aggregation core's hot path but
    /// part of the uniform capability set adapters must expose.
    async fn get_historical(
        &self,
        symbol: &str,
        interval: Interval,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
        limit: u32,
        deadline: Duration,
    ) -> ProviderResult<Vec<Candle>>;

    /// Fetch a coarse market snapshot (price, volume, 24h change).
    async fn get_market_data(&self, symbol: &str, deadline: Duration) -> ProviderResult<MarketData>;

    /// Fetch an order book to the given depth. Providers without a public
    /// order book endpoint (CoinGecko) return `ProviderErrorKind::Unsupported`.
    async fn get_order_book(&self, symbol: &str, depth: u32, deadline: Duration) -> ProviderResult<OrderBook>;

    /// Lightweight liveness probe; updates `status()` as a side effect.
    async fn ping(&self, deadline: Duration) -> ProviderResult<()>;

    /// Current derived health status.
    fn status(&self) -> crate::types::ProviderStatus;

    /// Static per-provider base weight in `[0, 10]` set at construction time.
    fn weight(&self) -> f64;

    /// Whether this provider is currently eligible for selection.
    fn is_healthy(&self) -> bool {
        matches!(self.status(), crate::types::ProviderStatus::Healthy)
    }

    /// Non-blocking probe of the rate limiter: `true` if a token is available now.
    fn check_rate_limit(&self) -> bool;

    /// Snapshot of accumulated call statistics (§4.F).
    fn health_snapshot(&self) -> HealthSnapshot;
}
