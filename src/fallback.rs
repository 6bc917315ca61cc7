//! REST snapshot fallback
//!
//! Every subscribed symbol gets a loop that re-reads a depth snapshot and
//! the last price on a fixed cadence, whether or not its stream is healthy.
//! The loop belongs to one subscription and ends once that subscription is
//! gone, even if the symbol has been subscribed again since.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::Result;
use crate::orderbook::{Lease, OrderBookState};
use crate::rest::SnapshotSource;

pub struct FallbackLoop {
    lease: Lease,
    engine: Arc<Engine>,
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
    depth_limit: usize,
}

impl FallbackLoop {
    pub fn new(
        lease: Lease,
        engine: Arc<Engine>,
        source: Arc<dyn SnapshotSource>,
        interval: Duration,
        depth_limit: usize,
    ) -> Self {
        Self {
            lease,
            engine,
            source,
            interval,
            depth_limit,
        }
    }

    fn symbol(&self) -> &str {
        self.lease.symbol()
    }

    /// Poll until the subscription is gone
    pub async fn run(self) {
        info!(symbol = %self.symbol(), interval_ms = self.interval.as_millis() as u64, "Starting snapshot fallback");

        while self.engine.manager().holds(&self.lease).await {
            match self.poll_once().await {
                Ok(Some(state)) => debug!(
                    symbol = %self.symbol(),
                    asks = state.asks_processed,
                    bids = state.bids_processed,
                    "Fallback pass complete"
                ),
                Ok(None) => {}
                Err(e) => {
                    self.engine
                        .metrics()
                        .snapshot_passes_total
                        .with_label_values(&["failed"])
                        .inc();
                    warn!(symbol = %self.symbol(), error = %e, "Fallback snapshot failed");
                }
            }

            // No lock is held here
            sleep(self.interval).await;
        }

        info!(symbol = %self.symbol(), "Snapshot fallback stopped");
    }

    /// One fetch-and-apply pass; network I/O happens before any lock is taken
    pub async fn poll_once(&self) -> Result<Option<OrderBookState>> {
        let last_price = self.source.last_price(self.symbol()).await?;
        let snapshot = self
            .source
            .depth_snapshot(self.symbol(), self.depth_limit)
            .await?;

        self.engine
            .on_snapshot(&self.lease, &snapshot, last_price)
            .await
    }
}
