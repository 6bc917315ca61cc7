//! Error types for the order book watcher

use thiserror::Error;

/// Order book watcher errors
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Subscription limit of {limit} symbols reached")]
    SubscriptionLimit { limit: usize },

    #[error("Timed out acquiring order book for {symbol} after {waited_ms}ms")]
    LockTimeout { symbol: String, waited_ms: u64 },

    #[error("Connection timeout")]
    ConnectionTimeout,
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        MarketDataError::RestApiError(err.to_string())
    }
}

impl From<std::io::Error> for MarketDataError {
    fn from(err: std::io::Error) -> Self {
        MarketDataError::IpcError(err.to_string())
    }
}

impl From<config::ConfigError> for MarketDataError {
    fn from(err: config::ConfigError) -> Self {
        MarketDataError::ConfigError(err.to_string())
    }
}

impl From<prometheus::Error> for MarketDataError {
    fn from(err: prometheus::Error) -> Self {
        MarketDataError::Metrics(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
