//! Orderbook Watch - live Binance order book library
//!
//! Tracks the order books of subscribed symbols from diff streams and
//! periodic REST snapshots, keeps per-level age and hit counts, and exposes
//! the top levels by notional to viewers.

use std::sync::Arc;

pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod markets;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod publisher;
pub mod rest;
pub mod server;
pub mod subscription;
pub mod websocket;

pub use config::{Config, SnapshotMode};
pub use engine::Engine;
pub use error::{MarketDataError, Result};
pub use markets::MarketDirectory;
pub use metrics::Metrics;
pub use orderbook::{Lease, OrderBookManager, OrderBookState, SymbolBook};
pub use parser::{DepthSnapshot, DepthUpdate, ParsedMessage, TickerEvent};
pub use publisher::{Publisher, PushEvent};
pub use rest::{RestClient, SnapshotSource};
pub use subscription::SubscriptionService;
pub use websocket::{StreamConsumer, StreamKind};

/// Application state shared across components
pub struct AppState {
    pub engine: Arc<Engine>,
    pub subscriptions: Arc<SubscriptionService>,
    pub directory: Arc<MarketDirectory>,
    pub config: Arc<Config>,
}
