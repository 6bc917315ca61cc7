//! Subscription service
//!
//! Admits symbols into the active set and starts their workers: one depth
//! stream consumer and one snapshot fallback loop per symbol.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{MarketDataError, Result};
use crate::fallback::FallbackLoop;
use crate::markets::MarketDirectory;
use crate::orderbook::Lease;
use crate::rest::SnapshotSource;
use crate::websocket::StreamConsumer;

pub struct SubscriptionService {
    engine: Arc<Engine>,
    source: Arc<dyn SnapshotSource>,
    directory: Arc<MarketDirectory>,
    config: Arc<Config>,
}

impl SubscriptionService {
    pub fn new(
        engine: Arc<Engine>,
        source: Arc<dyn SnapshotSource>,
        directory: Arc<MarketDirectory>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            engine,
            source,
            directory,
            config,
        }
    }

    /// Start tracking a symbol.
    ///
    /// Returns `Ok(true)` when workers were started and `Ok(false)` when the
    /// symbol was already tracked.
    pub async fn subscribe(&self, symbol: &str) -> Result<bool> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() || !self.directory.admits(&symbol).await {
            return Err(MarketDataError::UnknownSymbol(symbol));
        }

        let Some(lease) = self.engine.track(&symbol).await? else {
            info!(symbol = %symbol, "Already subscribed");
            return Ok(false);
        };

        self.spawn_depth_consumer(lease.clone());
        self.spawn_fallback(lease);
        info!(symbol = %symbol, "Subscribed to order book");
        Ok(true)
    }

    /// Stop tracking a symbol; its workers exit on their next iteration even
    /// if the symbol is subscribed again in the meantime
    pub async fn unsubscribe(&self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_uppercase();
        let removed = self.engine.untrack(&symbol).await;
        if removed {
            info!(symbol = %symbol, "Unsubscribed from order book");
        }
        removed
    }

    fn spawn_depth_consumer(&self, lease: Lease) {
        let mut consumer = StreamConsumer::depth(
            lease,
            !self.config.market_ticker_stream,
            &self.config.ws_endpoint,
            Arc::clone(&self.engine),
            self.config.reconnect_delay_ms,
            self.config.reconnect_alert_after,
        );
        tokio::spawn(async move { consumer.run().await });
    }

    fn spawn_fallback(&self, lease: Lease) {
        let fallback = FallbackLoop::new(
            lease,
            Arc::clone(&self.engine),
            Arc::clone(&self.source),
            Duration::from_millis(self.config.fallback_interval_ms),
            self.config.depth_levels,
        );
        tokio::spawn(fallback.run());
    }
}
