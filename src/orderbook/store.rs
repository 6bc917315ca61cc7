//! Per-symbol price level storage
//!
//! Uses BTreeMap per side keyed by normalized price. The store owns the
//! symbol's [`AgeHitTracker`], so a level and its age/hit entry are always
//! created and removed together.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::{AgeHitTracker, Side};

#[derive(Debug, Clone, Copy)]
struct StoredLevel {
    quantity: Decimal,
    notional: Decimal,
    updated: bool,
}

/// A live level joined with its age/hit record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub first_seen_at: DateTime<Utc>,
    pub hit_count: u64,
    pub updated: bool,
}

/// Result of folding one (price, quantity) pair into the store
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpsertOutcome {
    /// The level exists after the update
    Live(PriceLevel),
    /// Quantity was zero and the level was deleted
    Removed,
    /// Quantity was zero and there was nothing to delete
    Absent,
}

/// Both sides of one symbol's book plus their age/hit history
#[derive(Debug, Default)]
pub struct PriceLevelStore {
    asks: BTreeMap<Decimal, StoredLevel>,
    bids: BTreeMap<Decimal, StoredLevel>,
    tracker: AgeHitTracker,
}

impl PriceLevelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn side(&self, side: Side) -> &BTreeMap<Decimal, StoredLevel> {
        match side {
            Side::Ask => &self.asks,
            Side::Bid => &self.bids,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, StoredLevel> {
        match side {
            Side::Ask => &mut self.asks,
            Side::Bid => &mut self.bids,
        }
    }

    /// Create, update or delete the level at `price`.
    ///
    /// A zero quantity deletes the level together with its tracker entry;
    /// deleting an absent level is a no-op. Any other quantity touches the
    /// tracker (fresh age and one hit on creation, one more hit otherwise)
    /// and marks the level as updated.
    pub fn upsert(
        &mut self,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        if quantity.is_zero() {
            return if self.remove(side, price) {
                UpsertOutcome::Removed
            } else {
                UpsertOutcome::Absent
            };
        }

        let notional = price * quantity;
        self.side_mut(side).insert(
            price,
            StoredLevel {
                quantity,
                notional,
                updated: true,
            },
        );
        let touch = self.tracker.touch(side, price, now);

        UpsertOutcome::Live(PriceLevel {
            price,
            quantity,
            notional,
            first_seen_at: touch.first_seen_at,
            hit_count: touch.hit_count,
            updated: true,
        })
    }

    /// Delete a level and forget its history
    pub fn remove(&mut self, side: Side, price: Decimal) -> bool {
        let removed = self.side_mut(side).remove(&price).is_some();
        let forgotten = self.tracker.forget(side, price);
        debug_assert_eq!(removed, forgotten, "store and tracker diverged at {price}");
        removed
    }

    pub fn get(&self, side: Side, price: Decimal) -> Option<PriceLevel> {
        self.side(side)
            .get(&price)
            .and_then(|stored| self.join(side, price, stored))
    }

    fn join(&self, side: Side, price: Decimal, stored: &StoredLevel) -> Option<PriceLevel> {
        let touch = self.tracker.get(side, price);
        debug_assert!(touch.is_some(), "level {price} has no tracker entry");
        touch.map(|t| PriceLevel {
            price,
            quantity: stored.quantity,
            notional: stored.notional,
            first_seen_at: t.first_seen_at,
            hit_count: t.hit_count,
            updated: stored.updated,
        })
    }

    /// All live levels of a side in price order
    pub fn levels(&self, side: Side) -> Vec<PriceLevel> {
        self.side(side)
            .iter()
            .filter_map(|(price, stored)| self.join(side, *price, stored))
            .collect()
    }

    pub fn prices(&self, side: Side) -> Vec<Decimal> {
        self.side(side).keys().copied().collect()
    }

    /// The `n` largest levels by notional, see [`rank`] for tie-breaks
    pub fn top_n(&self, side: Side, n: usize) -> Vec<PriceLevel> {
        let mut levels = self.levels(side);
        levels.sort_by(|a, b| rank(side, a, b));
        levels.truncate(n);
        levels
    }

    /// Drop every level outside the top `n`; returns how many were dropped
    pub fn retain_top(&mut self, side: Side, n: usize) -> usize {
        if self.side(side).len() <= n {
            return 0;
        }

        let excess: Vec<Decimal> = {
            let mut levels = self.levels(side);
            levels.sort_by(|a, b| rank(side, a, b));
            levels.into_iter().skip(n).map(|l| l.price).collect()
        };

        for price in &excess {
            self.remove(side, *price);
        }
        excess.len()
    }

    /// Reset the updated flag ahead of a new reconciliation pass
    pub fn clear_updated(&mut self) {
        for level in self.asks.values_mut().chain(self.bids.values_mut()) {
            level.updated = false;
        }
    }

    pub fn len(&self, side: Side) -> usize {
        self.side(side).len()
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    pub fn tracker(&self) -> &AgeHitTracker {
        &self.tracker
    }
}

/// Ranking order: notional descending, then the price closer to the touch
/// (lowest ask, highest bid). Prices are unique per side, so this is total.
pub(crate) fn rank(side: Side, a: &PriceLevel, b: &PriceLevel) -> Ordering {
    b.notional.cmp(&a.notional).then_with(|| match side {
        Side::Ask => a.price.cmp(&b.price),
        Side::Bid => b.price.cmp(&a.price),
    })
}
