//! Materialization of the viewer-facing book state

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use super::{LevelView, OrderBookState, PriceLevel, PriceLevelStore, Side};

/// Format an elapsed time as `HH:MM:SS`.
///
/// Hours are not wrapped at 24 and negative spans (clock skew) read as zero.
pub fn format_age(elapsed: Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub(crate) fn level_view(level: &PriceLevel, now: DateTime<Utc>) -> LevelView {
    LevelView {
        price: level.price,
        quantity: level.quantity,
        usdt: level.notional,
        age: format_age(now - level.first_seen_at),
        hits: level.hit_count,
        updated: level.updated,
    }
}

/// Build the top-`depth` view of both sides and the derived counters
pub fn materialize(
    symbol: &str,
    store: &PriceLevelStore,
    current_price: Decimal,
    depth: usize,
    now: DateTime<Utc>,
) -> OrderBookState {
    let asks: Vec<LevelView> = store
        .top_n(Side::Ask, depth)
        .iter()
        .map(|l| level_view(l, now))
        .collect();
    let bids: Vec<LevelView> = store
        .top_n(Side::Bid, depth)
        .iter()
        .map(|l| level_view(l, now))
        .collect();

    let asks_processed = asks.len();
    let bids_processed = bids.len();

    OrderBookState {
        symbol: symbol.to_string(),
        current_price,
        asks,
        bids,
        diff_processed: asks_processed as i64 - bids_processed as i64,
        asks_processed,
        bids_processed,
        total_processed: asks_processed + bids_processed,
    }
}
