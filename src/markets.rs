//! Directory of tradable USDT markets
//!
//! Loaded from the 24h ticker listing at startup. Decides which symbols may
//! be subscribed and backs the paginated market listing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::Result;
use crate::parser::MarketTicker;
use crate::rest::SnapshotSource;

const QUOTE_ASSET: &str = "USDT";

/// One page of the market listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPage {
    pub data: Vec<MarketTicker>,
    pub total: usize,
    pub total_usdt_pairs: usize,
    pub per_page: usize,
    pub page: usize,
    pub total_pages: usize,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Listing {
    markets: Vec<MarketTicker>,
    fetched_at: Option<DateTime<Utc>>,
}

/// USDT markets sorted by quote volume, most active first
#[derive(Debug, Default)]
pub struct MarketDirectory {
    listing: RwLock<Listing>,
}

impl MarketDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the full ticker listing and replace the cached one
    pub async fn refresh(&self, source: &dyn SnapshotSource) -> Result<usize> {
        let tickers = source.market_tickers().await?;
        let total = tickers.len();
        let count = self.load(tickers, Utc::now()).await;
        info!(total, usdt_pairs = count, "Market directory refreshed");
        Ok(count)
    }

    /// Replace the listing, keeping active USDT pairs only
    pub async fn load(&self, tickers: Vec<MarketTicker>, fetched_at: DateTime<Utc>) -> usize {
        let mut markets: Vec<MarketTicker> = tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with(QUOTE_ASSET) && t.last_price > Decimal::ZERO)
            .collect();
        markets.sort_by(|a, b| b.quote_volume.cmp(&a.quote_volume));

        let mut listing = self.listing.write().await;
        listing.markets = markets;
        listing.fetched_at = Some(fetched_at);
        listing.markets.len()
    }

    pub async fn is_loaded(&self) -> bool {
        !self.listing.read().await.markets.is_empty()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        self.listing
            .read()
            .await
            .markets
            .iter()
            .any(|m| m.symbol == symbol)
    }

    /// Whether `symbol` may be subscribed; anything goes while the listing
    /// is unavailable
    pub async fn admits(&self, symbol: &str) -> bool {
        !self.is_loaded().await || self.contains(symbol).await
    }

    /// Page through the listing, optionally filtered by a symbol substring.
    ///
    /// Pages are 1-based; `page` 0 is treated as 1.
    pub async fn page(&self, page: usize, per_page: usize, search: Option<&str>) -> MarketPage {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let search = search.map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty());

        let listing = self.listing.read().await;
        let filtered: Vec<&MarketTicker> = listing
            .markets
            .iter()
            .filter(|m| search.as_deref().map_or(true, |s| m.symbol.contains(s)))
            .collect();

        let total = filtered.len();
        let data = filtered
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .cloned()
            .collect();

        MarketPage {
            data,
            total,
            total_usdt_pairs: listing.markets.len(),
            per_page,
            page,
            total_pages: total.div_ceil(per_page),
            last_update: listing.fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::MockSnapshotSource;
    use rust_decimal_macros::dec;

    fn ticker(symbol: &str, last: Decimal, volume: Decimal) -> MarketTicker {
        MarketTicker {
            symbol: symbol.to_string(),
            last_price: last,
            price_change_percent: Decimal::ZERO,
            quote_volume: volume,
        }
    }

    fn sample() -> Vec<MarketTicker> {
        vec![
            ticker("ETHUSDT", dec!(3000), dec!(500)),
            ticker("BTCUSDT", dec!(50000), dec!(900)),
            ticker("ETHBTC", dec!(0.06), dec!(10_000)),
            ticker("DEADUSDT", dec!(0), dec!(1)),
            ticker("SOLUSDT", dec!(100), dec!(50)),
        ]
    }

    #[tokio::test]
    async fn test_load_filters_and_sorts() {
        let directory = MarketDirectory::new();
        assert_eq!(directory.load(sample(), Utc::now()).await, 3);

        let page = directory.page(1, 10, None).await;
        let symbols: Vec<_> = page.data.iter().map(|m| m.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        assert_eq!(page.total_usdt_pairs, 3);
        assert!(page.last_update.is_some());
    }

    #[tokio::test]
    async fn test_pagination_and_search() {
        let directory = MarketDirectory::new();
        directory.load(sample(), Utc::now()).await;

        let page = directory.page(2, 2, None).await;
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].symbol, "SOLUSDT");

        let page = directory.page(1, 20, Some("eth")).await;
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].symbol, "ETHUSDT");

        let beyond = directory.page(9, 20, None).await;
        assert!(beyond.data.is_empty());
    }

    #[tokio::test]
    async fn test_huge_page_number_is_empty() {
        let directory = MarketDirectory::new();
        directory.load(sample(), Utc::now()).await;

        let page = directory.page(usize::MAX, 2, None).await;
        assert!(page.data.is_empty());
        assert_eq!(page.page, usize::MAX);
        assert_eq!(page.total, 3);

        let page = directory.page(2, usize::MAX, None).await;
        assert!(page.data.is_empty());
        assert_eq!(page.total_pages, 1);
    }

    #[tokio::test]
    async fn test_admission() {
        let directory = MarketDirectory::new();
        assert!(directory.admits("ANYTHING").await);

        directory.load(sample(), Utc::now()).await;
        assert!(directory.admits("BTCUSDT").await);
        assert!(!directory.admits("ETHBTC").await);
    }

    #[tokio::test]
    async fn test_refresh_from_source() {
        let mut source = MockSnapshotSource::new();
        source.expect_market_tickers().times(1).returning(|| Ok(sample()));

        let directory = MarketDirectory::new();
        assert_eq!(directory.refresh(&source).await.unwrap(), 3);
        assert!(directory.contains("SOLUSDT").await);
    }
}
