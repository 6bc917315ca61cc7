//! Benchmarks for order book reconciliation

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use orderbook_watch::orderbook::{materialize, PriceLevelStore, Side, SymbolBook};
use orderbook_watch::parser::{DepthSnapshot, DepthUpdate, PriceLevel};
use orderbook_watch::SnapshotMode;
use rust_decimal::Decimal;
use std::str::FromStr;

fn create_snapshot(levels: usize) -> DepthSnapshot {
    let bids: Vec<PriceLevel> = (0..levels)
        .map(|i| PriceLevel {
            price: Decimal::from(50000 - i as i64),
            quantity: Decimal::from_str("1.5").unwrap(),
        })
        .collect();

    let asks: Vec<PriceLevel> = (0..levels)
        .map(|i| PriceLevel {
            price: Decimal::from(50001 + i as i64),
            quantity: Decimal::from_str("1.5").unwrap(),
        })
        .collect();

    DepthSnapshot {
        last_update_id: 1000,
        bids,
        asks,
    }
}

fn create_update(base_id: u64) -> DepthUpdate {
    DepthUpdate {
        event_type: "depthUpdate".to_string(),
        event_time: 1672531200000,
        symbol: "BTCUSDT".to_string(),
        first_update_id: base_id,
        final_update_id: base_id + 1,
        bids: vec![
            PriceLevel {
                price: Decimal::from(49999),
                quantity: Decimal::from_str("2.0").unwrap(),
            },
            PriceLevel {
                price: Decimal::from(49990),
                quantity: Decimal::ZERO,
            },
        ],
        asks: vec![PriceLevel {
            price: Decimal::from(50001),
            quantity: Decimal::from_str("2.5").unwrap(),
        }],
    }
}

fn seeded_book(levels: usize) -> SymbolBook {
    let mut book = SymbolBook::new("BTCUSDT", 30);
    book.apply_snapshot(&create_snapshot(levels), SnapshotMode::Merge, Utc::now());
    book
}

fn benchmark_apply_snapshot(c: &mut Criterion) {
    let snapshot = create_snapshot(100);

    c.bench_function("apply_snapshot_merge_100_levels", |b| {
        b.iter(|| {
            let mut book = SymbolBook::new("BTCUSDT", 30);
            book.apply_snapshot(black_box(&snapshot), SnapshotMode::Merge, Utc::now());
        })
    });

    let mut book = seeded_book(100);
    c.bench_function("apply_snapshot_reconcile_100_levels", |b| {
        b.iter(|| {
            book.apply_snapshot(black_box(&snapshot), SnapshotMode::Reconcile, Utc::now());
        })
    });
}

fn benchmark_apply_diff(c: &mut Criterion) {
    let mut book = seeded_book(100);
    let update = create_update(1001);

    c.bench_function("apply_diff", |b| {
        b.iter(|| {
            black_box(book.apply_diff(black_box(&update), Utc::now()));
        })
    });
}

fn benchmark_materialize(c: &mut Criterion) {
    let mut store = PriceLevelStore::new();
    let now = Utc::now();
    for level in create_snapshot(200).asks {
        store.upsert(Side::Ask, level.price, level.quantity, now);
    }

    c.bench_function("materialize_top_30_of_200", |b| {
        b.iter(|| {
            black_box(materialize("BTCUSDT", &store, Decimal::ONE, 30, Utc::now()));
        })
    });

    let mut book = seeded_book(100);
    c.bench_function("apply_ticker", |b| {
        b.iter(|| {
            black_box(book.apply_ticker(Decimal::from(50000), Utc::now()));
        })
    });
}

criterion_group!(
    benches,
    benchmark_apply_snapshot,
    benchmark_apply_diff,
    benchmark_materialize
);
criterion_main!(benches);
