//! Reconciled order book for a single symbol
//!
//! Both ingestion paths, the streaming diff and the REST fallback snapshot,
//! fold their levels through [`SymbolBook::apply_update`] and then rebuild the
//! cached view.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;

use super::view::{format_age, materialize};
use super::{OrderBookState, PriceLevelStore, Side, UpsertOutcome};
use crate::config::SnapshotMode;
use crate::parser::{self, DepthSnapshot, DepthUpdate};

/// Counts from one reconciliation pass, fed into metrics and logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Levels created or updated
    pub upserted: usize,
    /// Levels deleted by a zero quantity
    pub removed: usize,
    /// Stale levels zeroed by a snapshot reconcile
    pub purged: usize,
    /// Levels dropped for falling outside the view depth
    pub pruned: usize,
}

/// Order book for a single symbol
#[derive(Debug)]
pub struct SymbolBook {
    symbol: String,
    store: PriceLevelStore,
    /// Last trade price, only moved by ticker updates
    current_price: Decimal,
    /// Last materialized view
    view: OrderBookState,
    view_depth: usize,
}

impl SymbolBook {
    /// Create a new empty book
    pub fn new(symbol: &str, view_depth: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            store: PriceLevelStore::new(),
            current_price: Decimal::ZERO,
            view: OrderBookState::empty(symbol),
            view_depth,
        }
    }

    /// Fold a single (price, quantity) pair into the book.
    ///
    /// Shared by the diff and snapshot paths. Does not rebuild the view.
    pub fn apply_update(
        &mut self,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        self.store.upsert(side, price, quantity, now)
    }

    fn apply_batch(
        &mut self,
        side: Side,
        levels: &[parser::PriceLevel],
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) {
        for level in levels {
            match self.apply_update(side, level.price, level.quantity, now) {
                UpsertOutcome::Live(_) => report.upserted += 1,
                UpsertOutcome::Removed => report.removed += 1,
                UpsertOutcome::Absent => {}
            }
        }
    }

    /// Apply an incremental depth diff.
    ///
    /// Prices absent from the diff are left untouched. Returns `None` when
    /// the diff carries no levels at all.
    pub fn apply_diff(&mut self, update: &DepthUpdate, now: DateTime<Utc>) -> Option<ReconcileReport> {
        if update.asks.is_empty() && update.bids.is_empty() {
            return None;
        }

        let mut report = ReconcileReport::default();
        self.store.clear_updated();
        self.apply_batch(Side::Ask, &update.asks, now, &mut report);
        self.apply_batch(Side::Bid, &update.bids, now, &mut report);

        report.pruned = self.rematerialize(now);
        Some(report)
    }

    /// Apply a full REST snapshot with the same merge semantics as a diff.
    ///
    /// In [`SnapshotMode::Reconcile`] stored prices that lie within the
    /// snapshot's price range for a side, but are missing from it, are zeroed
    /// first. Levels beyond that range are kept since the snapshot does not
    /// cover them.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &DepthSnapshot,
        mode: SnapshotMode,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.store.clear_updated();

        if mode == SnapshotMode::Reconcile {
            report.purged += self.purge_missing(Side::Ask, &snapshot.asks, now);
            report.purged += self.purge_missing(Side::Bid, &snapshot.bids, now);
        }

        self.apply_batch(Side::Ask, &snapshot.asks, now, &mut report);
        self.apply_batch(Side::Bid, &snapshot.bids, now, &mut report);

        report.pruned = self.rematerialize(now);
        report
    }

    fn purge_missing(
        &mut self,
        side: Side,
        levels: &[parser::PriceLevel],
        now: DateTime<Utc>,
    ) -> usize {
        let (Some(low), Some(high)) = (
            levels.iter().map(|l| l.price).min(),
            levels.iter().map(|l| l.price).max(),
        ) else {
            return 0;
        };

        let present: HashSet<Decimal> = levels.iter().map(|l| l.price).collect();
        let stale: Vec<Decimal> = self
            .store
            .prices(side)
            .into_iter()
            .filter(|p| *p >= low && *p <= high && !present.contains(p))
            .collect();

        for price in &stale {
            self.apply_update(side, *price, Decimal::ZERO, now);
        }
        stale.len()
    }

    /// Record a new last price and refresh displayed ages.
    ///
    /// Non-positive prices are ignored and return `false`.
    pub fn apply_ticker(&mut self, price: Decimal, now: DateTime<Utc>) -> bool {
        if price <= Decimal::ZERO {
            return false;
        }
        self.current_price = price;
        self.view.current_price = price;
        self.refresh_ages(now);
        true
    }

    /// Re-stamp the age of every level in the cached view without
    /// touching quantities, hits or ranking
    pub fn refresh_ages(&mut self, now: DateTime<Utc>) {
        let tracker = self.store.tracker();
        for (side, levels) in [(Side::Ask, &mut self.view.asks), (Side::Bid, &mut self.view.bids)] {
            for level in levels.iter_mut() {
                if let Some(touch) = tracker.get(side, level.price) {
                    level.age = format_age(now - touch.first_seen_at);
                }
            }
        }
    }

    /// Prune the store to the view depth and rebuild the cached view
    fn rematerialize(&mut self, now: DateTime<Utc>) -> usize {
        let pruned = self.store.retain_top(Side::Ask, self.view_depth)
            + self.store.retain_top(Side::Bid, self.view_depth);
        self.view = materialize(&self.symbol, &self.store, self.current_price, self.view_depth, now);
        pruned
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn current_price(&self) -> Decimal {
        self.current_price
    }

    pub fn store(&self) -> &PriceLevelStore {
        &self.store
    }

    /// Current view, as last materialized
    pub fn state(&self) -> &OrderBookState {
        &self.view
    }
}
