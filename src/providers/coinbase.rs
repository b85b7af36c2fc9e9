//! Coinbase Exchange adapter: `GET /products/{pair}/ticker`, `/stats`,
//! `/candles`, `/book?level=2`, `/time`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;

use crate::config::ProviderConfig;
use crate::types::{PriceSample, ProviderStatus};

use super::health::{HealthSnapshot, HealthTracker};
use super::normalize::to_coinbase;
use super::rate_limiter::TokenBucketRateLimiter;
use super::{Candle, Interval, MarketData, OrderBook, ProviderAdapter, ProviderError, ProviderErrorKind, ProviderResult};

const BASE_URL: &str = "https://api.exchange.coinbase.com";

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
    volume: String,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    open: String,
    last: String,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

pub struct CoinbaseAdapter {
    client: reqwest::Client,
    config: ProviderConfig,
    rate_limiter: TokenBucketRateLimiter,
    health: HealthTracker,
}

impl CoinbaseAdapter {
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

    /// Builds the `CB-ACCESS-SIGN` header: base64(HMAC-SHA256(secret, timestamp+method+path+body)).
    /// Exercised by authenticated account endpoints, none of which the
    /// aggregation path calls, but kept alongside the client for parity
    /// with how account-scoped requests would be signed.
    #[allow(dead_code)]
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> ProviderResult<String> {
        let secret = self.config.api_key.as_deref().ok_or_else(|| {
            ProviderError::new(self.name(), ProviderErrorKind::Unauthorized, "no API secret configured")
        })?;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::Unauthorized, e.to_string()))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn get(&self, path: &str, deadline: Duration) -> ProviderResult<reqwest::Response> {
        if !self.rate_limiter.acquire(deadline).await {
            self.health.record(false, Duration::ZERO, true);
            return Err(ProviderError::new(self.name(), ProviderErrorKind::RateLimited, "rate limit budget exhausted"));
        }

        let started = Instant::now();
        let url = format!("{BASE_URL}{path}");
        let result = tokio::time::timeout(
            deadline,
            self.client.get(&url).header("User-Agent", "market-data-core").send(),
        )
        .await;

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
                    warn!(provider = self.name(), "HTTP 429 rate limited by Coinbase");
                    self.health.record(false, started.elapsed(), false);
                    return Err(ProviderError::new(self.name(), ProviderErrorKind::RateLimited, "HTTP 429"));
                }
                if status == reqwest::StatusCode::NOT_FOUND {
                    self.health.record(false, started.elapsed(), false);
                    return Err(ProviderError::new(self.name(), ProviderErrorKind::InvalidSymbol, "unknown product id"));
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
impl ProviderAdapter for CoinbaseAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn get_price(&self, symbol: &str, deadline: Duration) -> ProviderResult<PriceSample> {
        let started = Instant::now();
        let pair = to_coinbase(symbol);
        let response = self.get(&format!("/products/{pair}/ticker"), deadline).await?;
        let body: TickerResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        let price: Decimal = body
            .price
            .parse()
            .map_err(|_| ProviderError::new(self.name(), ProviderErrorKind::NoData, "unparseable price"))?;

        Ok(PriceSample::new(symbol, price, self.name(), started.elapsed()))
    }

    async fn get_historical(
        &self,
        symbol: &str,
        interval: Interval,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
        _limit: u32,
        deadline: Duration,
    ) -> ProviderResult<Vec<Candle>> {
        let pair = to_coinbase(symbol);
        let granularity = interval.as_seconds();
        let path = format!(
            "/products/{pair}/candles?granularity={granularity}&start={}&end={}",
            from.to_rfc3339(),
            to.to_rfc3339()
        );
        let response = self.get(&path, deadline).await?;
        let rows: Vec<[f64; 6]> = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|[time, low, high, open, close, volume]| Candle {
                open_time: chrono::DateTime::from_timestamp(time as i64, 0).unwrap_or_else(chrono::Utc::now),
                open: Decimal::try_from(open).unwrap_or_default(),
                high: Decimal::try_from(high).unwrap_or_default(),
                low: Decimal::try_from(low).unwrap_or_default(),
                close: Decimal::try_from(close).unwrap_or_default(),
                volume: Decimal::try_from(volume).unwrap_or_default(),
            })
            .collect())
    }

    async fn get_market_data(&self, symbol: &str, deadline: Duration) -> ProviderResult<MarketData> {
        let pair = to_coinbase(symbol);
        let response = self.get(&format!("/products/{pair}/stats"), deadline).await?;
        let body: StatsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        let open: f64 = body.open.parse().unwrap_or(0.0);
        let last: f64 = body.last.parse().unwrap_or(0.0);
        let change_pct = if open > 0.0 { (last - open) / open * 100.0 } else { 0.0 };

        Ok(MarketData {
            symbol: symbol.to_string(),
            price: body.last.parse().unwrap_or_default(),
            volume_24h: Decimal::ZERO,
            change_24h_pct: change_pct,
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_order_book(&self, symbol: &str, _depth: u32, deadline: Duration) -> ProviderResult<OrderBook> {
        let pair = to_coinbase(symbol);
        let response = self.get(&format!("/products/{pair}/book?level=2"), deadline).await?;
        let body: BookResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        let parse_level = |level: &[String; 2]| -> Option<(Decimal, Decimal)> {
            Some((level[0].parse().ok()?, level[1].parse().ok()?))
        };

        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: body.bids.iter().filter_map(parse_level).collect(),
            asks: body.asks.iter().filter_map(parse_level).collect(),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn ping(&self, deadline: Duration) -> ProviderResult<()> {
        let result = self.get("/time", deadline).await;
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
