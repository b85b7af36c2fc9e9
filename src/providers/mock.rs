//! Scripted in-memory adapter for tests: returns queued responses instead of
//! making network calls, with configurable artificial latency.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::types::{PriceSample, ProviderStatus};

use super::health::{HealthSnapshot, HealthTracker};
use super::rate_limiter::TokenBucketRateLimiter;
use super::{Candle, Interval, MarketData, OrderBook, ProviderAdapter, ProviderError, ProviderErrorKind, ProviderResult};

/// One scripted response to `get_price`, consumed in FIFO order.
pub enum ScriptedPrice {
    Ok(Decimal),
    Err(ProviderErrorKind),
}

pub struct MockAdapter {
    name: String,
    weight: f64,
    queue: Mutex<VecDeque<ScriptedPrice>>,
    artificial_latency: Duration,
    rate_limiter: TokenBucketRateLimiter,
    health: HealthTracker,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            queue: Mutex::new(VecDeque::new()),
            artificial_latency: Duration::ZERO,
            rate_limiter: TokenBucketRateLimiter::new(1000, 1000.0),
            health: HealthTracker::new(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.artificial_latency = latency;
        self
    }

    /// Queue a price this adapter will return on the next `get_price` call.
    pub fn push_price(&self, price: Decimal) {
        self.queue.lock().push_back(ScriptedPrice::Ok(price));
    }

    /// Queue a failure this adapter will return on the next `get_price` call.
    pub fn push_error(&self, kind: ProviderErrorKind) {
        self.queue.lock().push_back(ScriptedPrice::Err(kind));
    }

    pub fn set_maintenance(&self, in_maintenance: bool) {
        self.health.set_maintenance(in_maintenance);
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_price(&self, symbol: &str, deadline: Duration) -> ProviderResult<PriceSample> {
        if !self.rate_limiter.acquire(deadline).await {
            return Err(ProviderError::new(self.name(), ProviderErrorKind::RateLimited, "mock rate limit"));
        }
        if !self.artificial_latency.is_zero() {
            tokio::time::sleep(self.artificial_latency).await;
        }

        let next = self.queue.lock().pop_front();
        match next {
            Some(ScriptedPrice::Ok(price)) => {
                self.health.record(true, self.artificial_latency, false);
                Ok(PriceSample::new(symbol, price, self.name(), self.artificial_latency))
            }
            Some(ScriptedPrice::Err(kind)) => {
                self.health.record(false, self.artificial_latency, kind == ProviderErrorKind::RateLimited);
                Err(ProviderError::new(self.name(), kind, "scripted failure"))
            }
            None => {
                self.health.record(false, self.artificial_latency, false);
                Err(ProviderError::new(self.name(), ProviderErrorKind::NoData, "mock queue exhausted"))
            }
        }
    }

    async fn get_historical(
        &self,
        _symbol: &str,
        _interval: Interval,
        _from: chrono::DateTime<chrono::Utc>,
        _to: chrono::DateTime<chrono::Utc>,
        _limit: u32,
        _deadline: Duration,
    ) -> ProviderResult<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn get_market_data(&self, symbol: &str, deadline: Duration) -> ProviderResult<MarketData> {
        let sample = self.get_price(symbol, deadline).await?;
        Ok(MarketData {
            symbol: symbol.to_string(),
            price: sample.price,
            volume_24h: Decimal::ZERO,
            change_24h_pct: 0.0,
            timestamp: sample.timestamp,
        })
    }

    async fn get_order_book(&self, symbol: &str, _depth: u32, _deadline: Duration) -> ProviderResult<OrderBook> {
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn ping(&self, _deadline: Duration) -> ProviderResult<()> {
        let ok = !matches!(self.health.status(), ProviderStatus::Down);
        self.health.record_ping(ok);
        if ok {
            Ok(())
        } else {
            Err(ProviderError::new(self.name(), ProviderErrorKind::NetworkError, "mock marked down"))
        }
    }

    fn status(&self) -> ProviderStatus {
        self.health.status()
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn check_rate_limit(&self) -> bool {
        self.rate_limiter.check()
    }

    fn health_snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_queued_prices_in_order() {
        let adapter = MockAdapter::new("mock-a", 1.0);
        adapter.push_price(Decimal::new(50_000, 0));
        adapter.push_price(Decimal::new(51_000, 0));

        let first = adapter.get_price("BTC", Duration::from_secs(1)).await.unwrap();
        let second = adapter.get_price("BTC", Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.price, Decimal::new(50_000, 0));
        assert_eq!(second.price, Decimal::new(51_000, 0));
    }

    #[tokio::test]
    async fn returns_scripted_error() {
        let adapter = MockAdapter::new("mock-b", 1.0);
        adapter.push_error(ProviderErrorKind::Timeout);
        let err = adapter.get_price("BTC", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Timeout);
    }

    #[tokio::test]
    async fn exhausted_queue_returns_no_data() {
        let adapter = MockAdapter::new("mock-c", 1.0);
        let err = adapter.get_price("BTC", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NoData);
    }
}
