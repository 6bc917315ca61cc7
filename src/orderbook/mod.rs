//! Order book module
//!
//! Reconciles Binance depth diffs and REST fallback snapshots into a
//! per-symbol book whose levels carry their age and hit count, and
//! materializes the top levels by notional for display.

mod book;
mod manager;
mod store;
mod tracker;
mod view;

pub use book::{ReconcileReport, SymbolBook};
pub use manager::{Lease, OrderBookManager};
pub use store::{PriceLevel, PriceLevelStore, UpsertOutcome};
pub use tracker::{AgeHitTracker, Touch};
pub use view::{format_age, materialize};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Levels per side exposed in a materialized view
pub const VIEW_DEPTH: usize = 30;

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single level as shown to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelView {
    pub price: Decimal,
    pub quantity: Decimal,
    /// Notional in quote currency
    pub usdt: Decimal,
    /// `HH:MM:SS` since the level appeared
    pub age: String,
    pub hits: u64,
    pub updated: bool,
}

/// Order book state to be published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookState {
    pub symbol: String,
    pub current_price: Decimal,
    pub asks: Vec<LevelView>,
    pub bids: Vec<LevelView>,
    pub diff_processed: i64,
    pub asks_processed: usize,
    pub bids_processed: usize,
    pub total_processed: usize,
}

impl OrderBookState {
    /// Empty state for a freshly subscribed symbol
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            current_price: Decimal::ZERO,
            asks: Vec::new(),
            bids: Vec::new(),
            diff_processed: 0,
            asks_processed: 0,
            bids_processed: 0,
            total_processed: 0,
        }
    }
}
