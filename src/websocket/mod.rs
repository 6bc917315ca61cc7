//! WebSocket module for Binance stream consumption

mod client;
mod consumer;

pub use client::WebSocketClient;
pub use consumer::{StreamConsumer, StreamKind};
