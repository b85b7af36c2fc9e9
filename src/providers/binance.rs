//! Binance adapter: `GET /api/v3/ticker/24hr`, `/klines`, `/depth`, `/ping`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;

use crate::config::ProviderConfig;
use crate::types::{PriceSample, ProviderStatus};

use super::health::{HealthSnapshot, HealthTracker};
use super::normalize::to_binance;
use super::rate_limiter::TokenBucketRateLimiter;
use super::{Candle, Interval, MarketData, OrderBook, ProviderAdapter, ProviderError, ProviderErrorKind, ProviderResult};

const BASE_URL: &str = "https://api.binance.com";

#[derive(Debug, Deserialize)]
struct Ticker24hr {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChangePercent")]
    #[allow(dead_code)]
    price_change_percent: String,
    volume: String,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

pub struct BinanceAdapter {
    client: reqwest::Client,
    config: ProviderConfig,
    rate_limiter: TokenBucketRateLimiter,
    health: HealthTracker,
}

impl BinanceAdapter {
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

    /// HMAC-SHA256 signature over the query string, as Binance's signed
    /// endpoints require. Unused by the public market-data calls this
    /// adapter makes today, but kept on the struct since private account
    /// endpoints share the same client and key material.
    #[allow(dead_code)]
    fn sign(&self, query: &str) -> ProviderResult<String> {
        let secret = self.config.api_key.as_deref().ok_or_else(|| {
            ProviderError::new(self.name(), ProviderErrorKind::Unauthorized, "no API secret configured")
        })?;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::Unauthorized, e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get(&self, path: &str, deadline: Duration) -> ProviderResult<reqwest::Response> {
        if !self.rate_limiter.acquire(deadline).await {
            self.health.record(false, Duration::ZERO, true);
            return Err(ProviderError::new(self.name(), ProviderErrorKind::RateLimited, "rate limit budget exhausted"));
        }

        let started = Instant::now();
        let url = format!("{BASE_URL}{path}");
        let result = tokio::time::timeout(deadline, self.client.get(&url).send()).await;

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
                    warn!(provider = self.name(), "HTTP 429 rate limited by Binance");
                    self.health.record(false, started.elapsed(), false);
                    return Err(ProviderError::new(self.name(), ProviderErrorKind::RateLimited, "HTTP 429"));
                }
                if status.as_u16() == 418 {
                    warn!(provider = self.name(), "HTTP 418 IP ban from Binance");
                    self.health.record(false, started.elapsed(), false);
                    return Err(ProviderError::new(self.name(), ProviderErrorKind::Maintenance, "IP banned (HTTP 418)"));
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
impl ProviderAdapter for BinanceAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn get_price(&self, symbol: &str, deadline: Duration) -> ProviderResult<PriceSample> {
        let started = Instant::now();
        let pair = to_binance(symbol);
        let response = self.get(&format!("/api/v3/ticker/24hr?symbol={pair}"), deadline).await?;
        let body: Ticker24hr = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        let price: Decimal = body
            .last_price
            .parse()
            .map_err(|_| ProviderError::new(self.name(), ProviderErrorKind::NoData, "unparseable lastPrice"))?;

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
        let pair = to_binance(symbol);
        let binance_interval = match interval {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::SixHours => "6h",
            Interval::OneDay => "1d",
        };
        let capped_limit = limit.min(1000);
        let path = format!("/api/v3/klines?symbol={pair}&interval={binance_interval}&limit={capped_limit}");
        let response = self.get(&path, deadline).await?;

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let arr = row.as_array().ok_or_else(|| {
                    ProviderError::new(self.name(), ProviderErrorKind::NoData, "malformed kline row")
                })?;
                let field = |i: usize| -> ProviderResult<Decimal> {
                    arr.get(i)
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ProviderError::new(self.name(), ProviderErrorKind::NoData, "malformed kline field"))
                };
                let open_time_ms = arr.first().and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(Candle {
                    open_time: chrono::DateTime::from_timestamp_millis(open_time_ms).unwrap_or_else(chrono::Utc::now),
                    open: field(1)?,
                    high: field(2)?,
                    low: field(3)?,
                    close: field(4)?,
                    volume: field(5)?,
                })
            })
            .collect()
    }

    async fn get_market_data(&self, symbol: &str, deadline: Duration) -> ProviderResult<MarketData> {
        let pair = to_binance(symbol);
        let response = self.get(&format!("/api/v3/ticker/24hr?symbol={pair}"), deadline).await?;
        let body: Ticker24hr = response
            .json()
            .await
            .map_err(|e| ProviderError::new(self.name(), ProviderErrorKind::NoData, e.to_string()))?;

        let price: Decimal = body.last_price.parse().unwrap_or_default();
        let volume: Decimal = body.volume.parse().unwrap_or_default();
        let change_pct: f64 = body.price_change_percent.parse().unwrap_or(0.0);

        Ok(MarketData {
            symbol: symbol.to_string(),
            price,
            volume_24h: volume,
            change_24h_pct: change_pct,
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_order_book(&self, symbol: &str, depth: u32, deadline: Duration) -> ProviderResult<OrderBook> {
        let pair = to_binance(symbol);
        let capped_depth = [5, 10, 20, 50, 100, 500, 1000, 5000]
            .into_iter()
            .find(|&tier| tier >= depth)
            .unwrap_or(5000);
        let response = self.get(&format!("/api/v3/depth?symbol={pair}&limit={capped_depth}"), deadline).await?;
        let body: DepthResponse = response
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
        let result = self.get("/api/v3/ping", deadline).await;
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
