//! Age and hit bookkeeping for price levels

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::Side;

/// Age origin and touch count of one live level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Touch {
    pub first_seen_at: DateTime<Utc>,
    pub hit_count: u64,
}

/// Records when each (side, price) of one symbol appeared and how many
/// updates it has received since.
///
/// Entries are created and dropped by [`super::PriceLevelStore`] only, in
/// lockstep with the levels they describe.
#[derive(Debug, Default)]
pub struct AgeHitTracker {
    entries: HashMap<(Side, Decimal), Touch>,
}

impl AgeHitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one update at `price`.
    ///
    /// The first touch since the last `forget` stamps `first_seen_at = now`
    /// with a hit count of 1; later touches only bump the count.
    pub fn touch(&mut self, side: Side, price: Decimal, now: DateTime<Utc>) -> Touch {
        let entry = self
            .entries
            .entry((side, price))
            .and_modify(|t| t.hit_count += 1)
            .or_insert(Touch {
                first_seen_at: now,
                hit_count: 1,
            });
        *entry
    }

    /// Drop all history for `price`; returns whether anything was tracked
    pub fn forget(&mut self, side: Side, price: Decimal) -> bool {
        self.entries.remove(&(side, price)).is_some()
    }

    pub fn get(&self, side: Side, price: Decimal) -> Option<Touch> {
        self.entries.get(&(side, price)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
