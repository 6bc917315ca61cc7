//! Reconciliation engine
//!
//! Entry point for everything that mutates book state: stream messages,
//! fallback snapshots and subscription changes. Work on a symbol happens
//! inside that symbol's lock; publishing happens after the lock is released,
//! on a cloned state.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace};

use crate::config::SnapshotMode;
use crate::error::{MarketDataError, Result};
use crate::metrics::Metrics;
use crate::orderbook::{Lease, OrderBookManager, OrderBookState, ReconcileReport, SymbolBook};
use crate::parser::{DepthSnapshot, DepthUpdate, ParsedMessage, TickerEvent};
use crate::publisher::{PriceUpdate, Publisher, PushEvent};

pub struct Engine {
    manager: Arc<OrderBookManager>,
    publisher: Arc<Publisher>,
    metrics: Metrics,
    snapshot_mode: SnapshotMode,
}

impl Engine {
    pub fn new(
        manager: Arc<OrderBookManager>,
        publisher: Arc<Publisher>,
        metrics: Metrics,
        snapshot_mode: SnapshotMode,
    ) -> Self {
        Self {
            manager,
            publisher,
            metrics,
            snapshot_mode,
        }
    }

    pub fn manager(&self) -> &Arc<OrderBookManager> {
        &self.manager
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Add `symbol` to the active set.
    ///
    /// Returns the lease of the new subscription, `None` if it was already there.
    pub async fn track(&self, symbol: &str) -> Result<Option<Lease>> {
        let lease = self.manager.subscribe(symbol).await?;
        if lease.is_some() {
            self.metrics.active_symbols.inc();
        }
        Ok(lease)
    }

    /// Remove `symbol` from the active set
    pub async fn untrack(&self, symbol: &str) -> bool {
        let removed = self.manager.unsubscribe(symbol).await;
        if removed {
            self.metrics.active_symbols.dec();
        }
        removed
    }

    /// Run `f` under the symbol's lock.
    ///
    /// With a lease for `symbol`, only the subscription it was issued for is
    /// touched. A lock timeout is a hard failure of that symbol's tracking:
    /// the symbol leaves the active set so its workers wind down.
    async fn with_book<R>(
        &self,
        symbol: &str,
        lease: Option<&Lease>,
        f: impl FnOnce(&mut SymbolBook) -> R,
    ) -> Result<Option<R>> {
        let started = Instant::now();
        let result = match lease.filter(|l| l.symbol() == symbol) {
            Some(lease) => self.manager.with_leased(lease, f).await,
            None => self.manager.with_book(symbol, f).await,
        };
        match result {
            Ok(result) => {
                self.metrics
                    .reconcile_seconds
                    .observe(started.elapsed().as_secs_f64());
                Ok(result)
            }
            Err(err @ MarketDataError::LockTimeout { .. }) => {
                self.metrics.lock_timeouts_total.inc();
                self.untrack(symbol).await;
                error!(symbol = %symbol, error = %err, "Dropping symbol after lock timeout");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn record(&self, report: &ReconcileReport) {
        let removed = &self.metrics.levels_removed_total;
        removed
            .with_label_values(&["zero_quantity"])
            .inc_by(report.removed as u64);
        removed.with_label_values(&["purged"]).inc_by(report.purged as u64);
        removed.with_label_values(&["pruned"]).inc_by(report.pruned as u64);
    }

    /// Parse and dispatch one raw stream message
    pub async fn process_message(&self, raw: &str) -> Result<()> {
        self.dispatch(raw, None).await
    }

    /// Like [`process_message`](Self::process_message), for a worker bound
    /// to one subscription: updates for the leased symbol are dropped once
    /// that subscription is gone
    pub async fn process_leased(&self, raw: &str, lease: &Lease) -> Result<()> {
        self.dispatch(raw, Some(lease)).await
    }

    async fn dispatch(&self, raw: &str, lease: Option<&Lease>) -> Result<()> {
        let parsed = ParsedMessage::parse(raw).map_err(|e| {
            self.metrics.dropped_total.with_label_values(&["malformed"]).inc();
            MarketDataError::from(e)
        })?;

        match parsed {
            ParsedMessage::DepthUpdate(update) => {
                self.depth(&update, lease).await?;
            }
            ParsedMessage::Tickers(tickers) => {
                // One bad symbol must not hold back the rest of an array
                let mut first_err = None;
                for ticker in &tickers {
                    if let Err(e) = self.ticker(ticker, lease).await {
                        first_err.get_or_insert(e);
                    }
                }
                if let Some(e) = first_err {
                    return Err(e);
                }
            }
            ParsedMessage::Unknown(msg) => {
                self.metrics.messages_total.with_label_values(&["unknown"]).inc();
                trace!(msg = %msg, "Unknown message type");
            }
        }

        Ok(())
    }

    /// Apply a depth diff and publish the refreshed book.
    ///
    /// Diffs for untracked symbols and diffs without levels are dropped.
    pub async fn on_depth(&self, update: &DepthUpdate) -> Result<Option<OrderBookState>> {
        self.depth(update, None).await
    }

    async fn depth(
        &self,
        update: &DepthUpdate,
        lease: Option<&Lease>,
    ) -> Result<Option<OrderBookState>> {
        self.metrics.messages_total.with_label_values(&["depth"]).inc();
        let now = Utc::now();

        let applied = self
            .with_book(&update.symbol, lease, |book| {
                book.apply_diff(update, now)
                    .map(|report| (report, book.state().clone()))
            })
            .await?;

        let (report, state) = match applied {
            None => {
                self.metrics
                    .dropped_total
                    .with_label_values(&["unknown_symbol"])
                    .inc();
                debug!(symbol = %update.symbol, "Diff for untracked symbol, ignoring");
                return Ok(None);
            }
            Some(None) => {
                self.metrics.dropped_total.with_label_values(&["empty"]).inc();
                debug!(symbol = %update.symbol, "Diff without levels, ignoring");
                return Ok(None);
            }
            Some(Some(applied)) => applied,
        };

        self.record(&report);
        debug!(
            symbol = %state.symbol,
            asks = state.asks_processed,
            bids = state.bids_processed,
            upserted = report.upserted,
            removed = report.removed,
            "Order book diff applied"
        );

        self.publisher
            .publish(PushEvent::OrderbookUpdate(state.clone()))
            .await?;
        Ok(Some(state))
    }

    /// Publish a price update and, for tracked symbols, refresh the book's
    /// price and level ages
    pub async fn on_ticker(&self, ticker: &TickerEvent) -> Result<()> {
        self.ticker(ticker, None).await
    }

    async fn ticker(&self, ticker: &TickerEvent, lease: Option<&Lease>) -> Result<()> {
        self.metrics.messages_total.with_label_values(&["ticker"]).inc();

        if ticker.last_price <= Decimal::ZERO {
            debug!(symbol = %ticker.symbol, "Ticker with non-positive price, not sent");
            return Ok(());
        }

        self.publisher
            .publish(PushEvent::PriceUpdate(PriceUpdate::from(ticker)))
            .await?;

        let now = Utc::now();
        let state = self
            .with_book(&ticker.symbol, lease, |book| {
                book.apply_ticker(ticker.last_price, now);
                book.state().clone()
            })
            .await?;

        if let Some(state) = state {
            self.publisher.publish(PushEvent::OrderbookUpdate(state)).await?;
        }
        Ok(())
    }

    /// Fold a fallback snapshot and its last price into the leased book.
    ///
    /// `Ok(None)` once the subscription behind `lease` is gone.
    pub async fn on_snapshot(
        &self,
        lease: &Lease,
        snapshot: &DepthSnapshot,
        last_price: Decimal,
    ) -> Result<Option<OrderBookState>> {
        let symbol = lease.symbol();
        let now = Utc::now();
        let mode = self.snapshot_mode;

        let applied = self
            .with_book(symbol, Some(lease), |book| {
                // the last price goes through the ticker path
                book.apply_ticker(last_price, now);
                let report = book.apply_snapshot(snapshot, mode, now);
                (report, book.state().clone())
            })
            .await?;

        let Some((report, state)) = applied else {
            debug!(symbol = %symbol, "Snapshot for a replaced subscription, ignoring");
            return Ok(None);
        };

        self.record(&report);
        self.metrics
            .snapshot_passes_total
            .with_label_values(&["applied"])
            .inc();
        debug!(
            symbol = %symbol,
            asks = state.asks_processed,
            bids = state.bids_processed,
            purged = report.purged,
            "Fallback snapshot applied"
        );

        self.publisher
            .publish(PushEvent::OrderbookUpdate(state.clone()))
            .await?;
        Ok(Some(state))
    }

    /// Log a one-line status per tracked symbol
    pub async fn log_status(&self) {
        for symbol in self.manager.symbols().await {
            match self.manager.get_state(&symbol).await {
                Ok(Some(state)) => info!(
                    symbol = %symbol,
                    current_price = %state.current_price,
                    asks = state.asks_processed,
                    bids = state.bids_processed,
                    viewers = self.publisher.viewer_count(),
                    "Order book status"
                ),
                Ok(None) => {}
                Err(e) => debug!(symbol = %symbol, error = %e, "Status unavailable"),
            }
        }
    }
}
