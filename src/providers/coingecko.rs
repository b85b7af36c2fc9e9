//! CoinGecko adapter: `GET /simple/price`, `/coins/{id}/market_chart`, `/coins/{id}`.
//!
//! No public order book endpoint exists, so [`get_order_book`] always fails
//! with [`ProviderErrorKind::Unsupported`] rather than being absent from the
//! trait — callers branch on the error kind instead of on the adapter type.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::config::ProviderConfig;
use crate::types::{PriceSample, ProviderStatus};

use super::health::{HealthSnapshot, HealthTracker};
use super::normalize::to_coingecko;
use super::rate_limiter::TokenBucketRateLimiter;
use super::{Candle, Interval, MarketData, OrderBook, ProviderAdapter, ProviderError, ProviderErrorKind, ProviderResult};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Deserialize)]
struct CoinEntry {
    usd: f64,
    usd_24h_vol: Option<f64>,
    usd_24h_change: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    prices: Vec<[f64; 2]>,
}

pub struct CoinGeckoAdapter {
    client: reqwest::Client,
    config: ProviderConfig,
    rate_limiter: TokenBucketRateLimiter,
    health: HealthTracker,
}

impl CoinGeckoAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let rate_limiter = TokenBucketRateLimiter::new(config.rate_limit_burst, config.rate_limit_per_sec);
        Self {
            client: reqwest::Client::builder()
                .timeout(config.connect_timeout)
                .build()
                .unwrap_or_default(),
            config,
            rate_limiter,
            health: HealthTracker::new(),
        }
    }

    fn coin_id(&self, symbol: &str) -> ProviderResult<&'static str> {
        to_coingecko(symbol)
            .ok_or_else(|| ProviderError::new(self.name(), ProviderErrorKind::InvalidSymbol, format!("no CoinGecko id for {symbol}")))
    }

    async fn get(&self, path: &str, deadline: Duration) -> ProviderResult<reqwest::Response> {
        if !self.rate_limiter.acquire(deadline).await {
            self.health.record(false, Duration::ZERO, true);
            return Err(ProviderError::new(self.name(), ProviderErrorKind::RateLimited, "rate limit budget exhausted"));
        }

        let started = Instant::now();
        let url = format!("{BASE_URL}{path}");
        let mut request = self.client.get(&url);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-cg-pro-api-key", key);
        }
        let result = tokio::time::timeout(deadline, request.send()).await;

        match result {
            Err(_) => {
                warn!(provider = self.name(), url = %url, "request timed out");
                self.health.record(false, started.elapsed(), false);
                Err(ProviderError::new(self.name(), ProviderErrorKind::Timeout, format!("request to {url} timed out")))
            }
            Ok(Err(e)) => {
                warn!(provider = self.name(), url = %url, error = %e, "network error");
                self.health.record(false, started.elapsed(), false);
                Err(ProviderError::new(self.name(), ProviderErrorKind::NetworkError, e.to_string()))
            }
            Ok(Ok(response)) => {
                let status = response.status();
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    warn!(provider = self.name(), "HTTP 429 rate limited by CoinGecko");
                    self.health.record(false, started.elapsed(), false);
                    return Err(ProviderError::new(self.name(), ProviderErrorKind::RateLimited, "HTTP 429"));
                }
                if !status.is_success() {
                    warn!(provider = self.name(), status = %status, "non-success response");
                    self.health.record(false, started.elapsed(), false);
                    let kind = if status.is_client_error() { ProviderErrorKind::BadRequest } else { ProviderErrorKind::ServerError };
                    return Err(ProviderError::new(self.name(), kind, format!("HTTP {status}")));
                }
                self.health.record(true, started.elapsed(), false);
                Ok(response)
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for CoinGeckoAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn get_price(&self, symbol: &str, deadline: Duration) -> ProviderResult<PriceSample> {
        let started = Instant::now();
        let id = self.coin_id(symbol)?;
        let path = format!("/simple/price?ids={id}&vs_currencies=usd");
        let response = self.get(&path, deadline).await?;
        let body: HashMap<String, CoinEntry> = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        let entry = body
            .get(id)
            .ok_or_else(|| ProviderError::new(self.name(), ProviderErrorKind::NoData, "symbol missing from response"))?;

        let price = Decimal::try_from(entry.usd)
            .map_err(|_| ProviderError::new(self.name(), ProviderErrorKind::NoData, "non-finite price"))?;

        Ok(PriceSample::new(symbol, price, self.name(), started.elapsed()))
    }

    async fn get_historical(
        &self,
        symbol: &str,
        interval: Interval,
        _from: chrono::DateTime<chrono::Utc>,
        _to: chrono::DateTime<chrono::Utc>,
        limit: u32,
        deadline: Duration,
    ) -> ProviderResult<Vec<Candle>> {
        let id = self.coin_id(symbol)?;
        let days = ((limit as u64 * interval.as_seconds()) / 86_400).max(1);
        let path = format!("/coins/{id}/market_chart?vs_currency=usd&days={days}");
        let response = self.get(&path, deadline).await?;
        let body: MarketChartResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        Ok(body
            .prices
            .into_iter()
            .map(|[timestamp_ms, price]| {
                let price = Decimal::try_from(price).unwrap_or_default();
                Candle {
                    open_time: chrono::DateTime::from_timestamp_millis(timestamp_ms as i64).unwrap_or_else(chrono::Utc::now),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: Decimal::ZERO,
                }
            })
            .collect())
    }

    async fn get_market_data(&self, symbol: &str, deadline: Duration) -> ProviderResult<MarketData> {
        let id = self.coin_id(symbol)?;
        let path = format!("/simple/price?ids={id}&vs_currencies=usd&include_24hr_vol=true&include_24hr_change=true");
        let response = self.get(&path, deadline).await?;
        let body: HashMap<String, CoinEntry> = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        let entry = body
            .get(id)
            .ok_or_else(|| ProviderError::new(self.name(), ProviderErrorKind::NoData, "symbol missing from response"))?;

        Ok(MarketData {
            symbol: symbol.to_string(),
            price: Decimal::try_from(entry.usd).unwrap_or_default(),
            volume_24h: Decimal::try_from(entry.usd_24h_vol.unwrap_or(0.0)).unwrap_or_default(),
            change_24h_pct: entry.usd_24h_change.unwrap_or(0.0),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_order_book(&self, _symbol: &str, _depth: u32, _deadline: Duration) -> ProviderResult<OrderBook> {
        Err(ProviderError::new(self.name(), ProviderErrorKind::Unsupported, "CoinGecko has no public order book endpoint"))
    }

    async fn ping(&self, deadline: Duration) -> ProviderResult<()> {
        let result = self.get("/ping", deadline).await;
        self.health.record_ping(result.is_ok());
        result.map(|_| ())
    }

    fn status(&self) -> ProviderStatus {
        self.health.status()
    }

    fn weight(&self) -> f64 {
        self.config.base_weight
    }

    fn check_rate_limit(&self) -> bool {
        self.rate_limiter.check()
    }

    fn health_snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }
}
