//! Configuration module for the order book watcher

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a fallback REST snapshot is folded into a symbol's book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    /// Additions and updates only; stored levels missing from the snapshot are kept
    Merge,
    /// Levels inside the snapshot's price range but missing from it are zeroed first
    #[default]
    Reconcile,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Symbols subscribed at startup (e.g., ["BTCUSDT", "ETHUSDT"])
    pub symbols: Vec<String>,

    /// WebSocket base endpoint for Binance
    pub ws_endpoint: String,

    /// REST API endpoint for snapshots
    pub rest_endpoint: String,

    /// Port of the JSON / WebSocket viewer server
    pub http_port: u16,

    /// Optional IPC socket path for publishing data
    pub ipc_socket_path: Option<String>,

    /// Depth of each REST fallback snapshot
    pub depth_levels: usize,

    /// Levels per side exposed in the materialized view
    pub view_depth: usize,

    /// Fallback snapshot cadence
    pub fallback_interval_ms: u64,
    pub snapshot_mode: SnapshotMode,

    /// Admission cap on concurrently tracked symbols
    pub max_subscriptions: usize,

    /// Bound on waiting for a symbol's book lock
    pub lock_timeout_ms: u64,
    pub rest_timeout_ms: u64,

    /// Reconnection settings; consumers retry forever and log an error once
    /// this many consecutive attempts have failed
    pub reconnect_delay_ms: u64,
    pub reconnect_alert_after: u32,

    /// Subscribe to the all-market ticker array stream
    pub market_ticker_stream: bool,

    /// Status logging interval in seconds
    pub health_check_interval_secs: u64,

    /// Capacity of the viewer broadcast channel
    pub channel_capacity: usize,
}

/// Flat shape read from the environment; `symbols` arrives comma separated
#[derive(Debug, Deserialize)]
struct RawConfig {
    symbols: String,
    ws_endpoint: String,
    rest_endpoint: String,
    http_port: u16,
    #[serde(default)]
    ipc_socket_path: Option<String>,
    depth_levels: usize,
    view_depth: usize,
    fallback_interval_ms: u64,
    snapshot_mode: SnapshotMode,
    max_subscriptions: usize,
    lock_timeout_ms: u64,
    rest_timeout_ms: u64,
    reconnect_delay_ms: u64,
    reconnect_alert_after: u32,
    market_ticker_stream: bool,
    health_check_interval_secs: u64,
    channel_capacity: usize,
}

impl Config {
    /// Load configuration from `.env` and environment variables over defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("symbols", defaults.symbols.join(","))?
            .set_default("ws_endpoint", defaults.ws_endpoint.clone())?
            .set_default("rest_endpoint", defaults.rest_endpoint.clone())?
            .set_default("http_port", i64::from(defaults.http_port))?
            .set_default("depth_levels", defaults.depth_levels as i64)?
            .set_default("view_depth", defaults.view_depth as i64)?
            .set_default("fallback_interval_ms", defaults.fallback_interval_ms as i64)?
            .set_default("snapshot_mode", "reconcile")?
            .set_default("max_subscriptions", defaults.max_subscriptions as i64)?
            .set_default("lock_timeout_ms", defaults.lock_timeout_ms as i64)?
            .set_default("rest_timeout_ms", defaults.rest_timeout_ms as i64)?
            .set_default("reconnect_delay_ms", defaults.reconnect_delay_ms as i64)?
            .set_default(
                "reconnect_alert_after",
                i64::from(defaults.reconnect_alert_after),
            )?
            .set_default("market_ticker_stream", defaults.market_ticker_stream)?
            .set_default(
                "health_check_interval_secs",
                defaults.health_check_interval_secs as i64,
            )?
            .set_default("channel_capacity", defaults.channel_capacity as i64)?
            .add_source(config::Environment::default())
            .build()?;

        let raw: RawConfig = settings.try_deserialize()?;
        Ok(raw.into())
    }
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        Self {
            symbols: parse_symbols(&raw.symbols),
            ws_endpoint: raw.ws_endpoint.trim_end_matches('/').to_string(),
            rest_endpoint: raw.rest_endpoint.trim_end_matches('/').to_string(),
            http_port: raw.http_port,
            ipc_socket_path: raw.ipc_socket_path.filter(|p| !p.trim().is_empty()),
            depth_levels: raw.depth_levels,
            view_depth: raw.view_depth.max(1),
            fallback_interval_ms: raw.fallback_interval_ms,
            snapshot_mode: raw.snapshot_mode,
            max_subscriptions: raw.max_subscriptions,
            lock_timeout_ms: raw.lock_timeout_ms,
            rest_timeout_ms: raw.rest_timeout_ms,
            reconnect_delay_ms: raw.reconnect_delay_ms,
            reconnect_alert_after: raw.reconnect_alert_after,
            market_ticker_stream: raw.market_ticker_stream,
            health_check_interval_secs: raw.health_check_interval_secs,
            channel_capacity: raw.channel_capacity.max(1),
        }
    }
}

/// Split a comma separated symbol list, uppercasing and skipping blanks
pub fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            ws_endpoint: "wss://stream.binance.com:9443".to_string(),
            rest_endpoint: "https://api.binance.com/api/v3".to_string(),
            http_port: 5000,
            ipc_socket_path: None,
            depth_levels: 20,
            view_depth: 30,
            fallback_interval_ms: 3000,
            snapshot_mode: SnapshotMode::Reconcile,
            max_subscriptions: 50,
            lock_timeout_ms: 2000,
            rest_timeout_ms: 5000,
            reconnect_delay_ms: 1000,
            reconnect_alert_after: 10,
            market_ticker_stream: true,
            health_check_interval_secs: 30,
            channel_capacity: 1024,
        }
    }
}
