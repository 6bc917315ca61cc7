//! End-to-end reconciliation scenarios driven through raw stream messages

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use orderbook_watch::{
    DepthSnapshot, Engine, Metrics, OrderBookManager, OrderBookState, Publisher, PushEvent,
    SnapshotMode,
};

async fn engine() -> Engine {
    let manager = Arc::new(OrderBookManager::new(30, 10, Duration::from_millis(200)));
    let publisher = Arc::new(Publisher::new(256, None).await.unwrap());
    Engine::new(manager, publisher, Metrics::new().unwrap(), SnapshotMode::Reconcile)
}

fn depth(symbol: &str, asks: &str, bids: &str) -> String {
    format!(
        r#"{{"e":"depthUpdate","E":1700000000000,"s":"{}","U":1,"u":2,"a":{},"b":{}}}"#,
        symbol, asks, bids
    )
}

async fn state(engine: &Engine, symbol: &str) -> OrderBookState {
    engine.manager().get_state(symbol).await.unwrap().unwrap()
}

#[tokio::test]
async fn diff_for_unsubscribed_symbol_is_dropped() {
    let engine = engine().await;
    let mut rx = engine.publisher().subscribe();

    engine
        .process_message(&depth("BTCUSDT", r#"[["50000","1.0"]]"#, "[]"))
        .await
        .unwrap();

    assert!(engine.manager().get_state("BTCUSDT").await.unwrap().is_none());
    assert!(engine.manager().is_empty().await);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn insert_then_remove_with_zero_quantity() {
    let engine = engine().await;
    engine.track("BTCUSDT").await.unwrap();
    let mut rx = engine.publisher().subscribe();

    engine
        .process_message(&depth("BTCUSDT", r#"[["50000","1.0"]]"#, "[]"))
        .await
        .unwrap();

    let book = state(&engine, "BTCUSDT").await;
    assert_eq!(book.asks.len(), 1);
    assert_eq!(book.asks[0].price, dec!(50000));
    assert_eq!(book.asks[0].quantity, dec!(1.0));
    assert_eq!(book.asks[0].usdt, dec!(50000));
    assert_eq!(book.asks[0].hits, 1);

    match rx.recv().await.unwrap() {
        PushEvent::OrderbookUpdate(pushed) => assert_eq!(pushed, book),
        other => panic!("Expected orderbook update, got {:?}", other),
    }

    engine
        .process_message(&depth("BTCUSDT", r#"[["50000","0"]]"#, "[]"))
        .await
        .unwrap();

    let book = state(&engine, "BTCUSDT").await;
    assert!(book.asks.is_empty());
    assert_eq!(book.total_processed, 0);
}

#[tokio::test]
async fn ranking_follows_current_notional() {
    let engine = engine().await;
    engine.track("ETHUSDT").await.unwrap();

    engine
        .process_message(&depth("ETHUSDT", "[]", r#"[["3000","2"],["2999","5"]]"#))
        .await
        .unwrap();
    engine
        .process_message(&depth("ETHUSDT", "[]", r#"[["3000","3"]]"#))
        .await
        .unwrap();

    let book = state(&engine, "ETHUSDT").await;
    let prices: Vec<Decimal> = book.bids.iter().map(|l| l.price).collect();
    assert_eq!(prices, vec![dec!(2999), dec!(3000)]);
    assert_eq!(book.bids[0].usdt, dec!(14995));
    assert_eq!(book.bids[1].usdt, dec!(9000));
    assert_eq!(book.bids[1].hits, 2);
    assert!(book.bids[1].updated);
    assert!(!book.bids[0].updated);

    engine
        .process_message(&depth("ETHUSDT", "[]", r#"[["3000","10"]]"#))
        .await
        .unwrap();

    let book = state(&engine, "ETHUSDT").await;
    assert_eq!(book.bids[0].price, dec!(3000));
    assert_eq!(book.bids[0].usdt, dec!(30000));
}

#[tokio::test]
async fn hits_grow_until_removal_resets_them() {
    let engine = engine().await;
    engine.track("BTCUSDT").await.unwrap();

    let mut last_hits = 0;
    for qty in ["1", "2", "1.5", "3"] {
        let asks = format!(r#"[["50000","{}"]]"#, qty);
        engine.process_message(&depth("BTCUSDT", &asks, "[]")).await.unwrap();

        let hits = state(&engine, "BTCUSDT").await.asks[0].hits;
        assert!(hits > last_hits);
        last_hits = hits;
    }
    assert_eq!(last_hits, 4);

    engine
        .process_message(&depth("BTCUSDT", r#"[["50000","0"]]"#, "[]"))
        .await
        .unwrap();
    engine
        .process_message(&depth("BTCUSDT", r#"[["50000","1"]]"#, "[]"))
        .await
        .unwrap();

    let book = state(&engine, "BTCUSDT").await;
    assert_eq!(book.asks[0].hits, 1);
    assert_eq!(book.asks[0].age, "00:00:00");
}

#[tokio::test]
async fn view_is_bounded_sorted_and_unique() {
    let engine = engine().await;
    engine.track("BTCUSDT").await.unwrap();

    let asks: Vec<String> = (0..45)
        .map(|i| format!(r#"["{}","{}"]"#, 50000 + i, 1 + i % 7))
        .collect();
    let bids: Vec<String> = (0..45)
        .map(|i| format!(r#"["{}","{}"]"#, 49999 - i, 1 + i % 5))
        .collect();
    let raw = depth(
        "BTCUSDT",
        &format!("[{}]", asks.join(",")),
        &format!("[{}]", bids.join(",")),
    );
    engine.process_message(&raw).await.unwrap();

    let book = state(&engine, "BTCUSDT").await;
    assert_eq!(book.asks_processed, 30);
    assert_eq!(book.bids_processed, 30);
    assert_eq!(book.total_processed, 60);
    assert_eq!(book.diff_processed, 0);

    for side in [&book.asks, &book.bids] {
        assert!(side.windows(2).all(|w| w[0].usdt >= w[1].usdt));

        let mut prices: Vec<Decimal> = side.iter().map(|l| l.price).collect();
        prices.sort();
        prices.dedup();
        assert_eq!(prices.len(), side.len());
    }

    for level in book.asks.iter().chain(book.bids.iter()) {
        assert!(!level.age.starts_with('-'));
        assert_eq!(level.age.len(), 8);
    }
}

#[tokio::test]
async fn snapshot_merge_counts_as_a_hit() {
    let engine = engine().await;
    let lease = engine.track("BTCUSDT").await.unwrap().unwrap();

    engine
        .process_message(&depth("BTCUSDT", r#"[["50001","1"]]"#, r#"[["49999","1"]]"#))
        .await
        .unwrap();

    let snapshot: DepthSnapshot = serde_json::from_str(
        r#"{"lastUpdateId":10,"asks":[["50001","1"]],"bids":[["49999","1"]]}"#,
    )
    .unwrap();
    let book = engine
        .on_snapshot(&lease, &snapshot, dec!(50000))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(book.current_price, dec!(50000));
    assert_eq!(book.asks[0].hits, 2);
    assert_eq!(book.bids[0].hits, 2);
}

#[tokio::test]
async fn combined_stream_ticker_updates_price() {
    let engine = engine().await;
    engine.track("BTCUSDT").await.unwrap();

    let raw = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1,"s":"BTCUSDT","c":"50123.40","P":"2.5","q":"123456.7"}}"#;
    engine.process_message(raw).await.unwrap();

    assert_eq!(state(&engine, "BTCUSDT").await.current_price, dec!(50123.4));
}

#[tokio::test]
async fn malformed_message_leaves_state_untouched() {
    let engine = engine().await;
    engine.track("BTCUSDT").await.unwrap();

    assert!(engine.process_message("{not json").await.is_err());
    assert!(engine
        .process_message(&depth("BTCUSDT", r#"[["50000","-1"]]"#, "[]"))
        .await
        .is_err());

    assert_eq!(state(&engine, "BTCUSDT").await.total_processed, 0);
}
