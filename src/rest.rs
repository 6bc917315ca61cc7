//! REST client for Binance snapshots
//!
//! The fallback loop and the market directory depend on [`SnapshotSource`]
//! rather than on reqwest directly.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

use crate::error::{MarketDataError, Result};
use crate::parser::{DepthSnapshot, LastPrice, MarketTicker};

/// Point-in-time market data fetched on demand
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Last traded price of `symbol`
    async fn last_price(&self, symbol: &str) -> Result<Decimal>;

    /// Top `limit` levels per side of `symbol`
    async fn depth_snapshot(&self, symbol: &str, limit: usize) -> Result<DepthSnapshot>;

    /// 24h ticker of every market
    async fn market_tickers(&self) -> Result<Vec<MarketTicker>>;
}

/// Binance spot REST client
pub struct RestClient {
    client: reqwest::Client,
    endpoint: String,
}

impl RestClient {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "REST request");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::RestApiError(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SnapshotSource for RestClient {
    async fn last_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/ticker/price?symbol={}", self.endpoint, symbol);
        let price: LastPrice = self.get_json(&url).await?;
        Ok(price.price)
    }

    async fn depth_snapshot(&self, symbol: &str, limit: usize) -> Result<DepthSnapshot> {
        let url = format!("{}/depth?symbol={}&limit={}", self.endpoint, symbol, limit);
        self.get_json(&url).await
    }

    async fn market_tickers(&self) -> Result<Vec<MarketTicker>> {
        let url = format!("{}/ticker/24hr", self.endpoint);
        self.get_json(&url).await
    }
}
