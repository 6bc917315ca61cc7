//! Long-lived stream consumers
//!
//! Handles reconnection with backoff and hands every message to the engine.
//! Per-message failures are logged and never end the consumer.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use super::WebSocketClient;
use crate::engine::Engine;
use crate::error::{MarketDataError, Result};
use crate::orderbook::Lease;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;
/// Idle time after which a keepalive ping is sent
const KEEPALIVE_SECS: u64 = 30;
/// Receive timeout after which the connection is considered stale
const RECV_TIMEOUT_SECS: u64 = 45;

/// What a consumer subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    /// Depth diffs of one symbol, plus its ticker when no market-wide feed runs
    Depth { symbol: String, with_ticker: bool },
    /// 24h tickers of every market
    MarketTickers,
}

impl StreamKind {
    /// Stream URL under the Binance WebSocket base endpoint
    pub fn url(&self, endpoint: &str) -> String {
        match self {
            StreamKind::Depth {
                symbol,
                with_ticker,
            } => {
                let s_lower = symbol.to_lowercase();
                let mut streams = vec![format!("{}@depth", s_lower)];
                if *with_ticker {
                    streams.push(format!("{}@ticker", s_lower));
                }
                format!("{}/stream?streams={}", endpoint, streams.join("/"))
            }
            StreamKind::MarketTickers => format!("{}/ws/!ticker@arr", endpoint),
        }
    }

    fn label(&self) -> &str {
        match self {
            StreamKind::Depth { symbol, .. } => symbol,
            StreamKind::MarketTickers => "!ticker@arr",
        }
    }
}

/// Consumes one Binance stream for as long as it is wanted
pub struct StreamConsumer {
    kind: StreamKind,
    /// Subscription a depth stream belongs to; `None` for the market feed
    lease: Option<Lease>,
    engine: Arc<Engine>,
    client: WebSocketClient,
    reconnect_delay_ms: u64,
    /// Consecutive failures after which the stream is reported as degraded
    alert_after: u32,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl StreamConsumer {
    /// Depth consumer bound to one subscription
    pub fn depth(
        lease: Lease,
        with_ticker: bool,
        endpoint: &str,
        engine: Arc<Engine>,
        reconnect_delay_ms: u64,
        alert_after: u32,
    ) -> Self {
        let kind = StreamKind::Depth {
            symbol: lease.symbol().to_string(),
            with_ticker,
        };
        Self::new(kind, Some(lease), endpoint, engine, reconnect_delay_ms, alert_after)
    }

    /// Market-wide `!ticker@arr` consumer
    pub fn market_tickers(
        endpoint: &str,
        engine: Arc<Engine>,
        reconnect_delay_ms: u64,
        alert_after: u32,
    ) -> Self {
        Self::new(
            StreamKind::MarketTickers,
            None,
            endpoint,
            engine,
            reconnect_delay_ms,
            alert_after,
        )
    }

    fn new(
        kind: StreamKind,
        lease: Option<Lease>,
        endpoint: &str,
        engine: Arc<Engine>,
        reconnect_delay_ms: u64,
        alert_after: u32,
    ) -> Self {
        let client = WebSocketClient::new(&kind.url(endpoint));

        Self {
            kind,
            lease,
            engine,
            client,
            reconnect_delay_ms,
            alert_after,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    /// Depth streams run while their subscription lives; the market feed always runs
    async fn wanted(&self) -> bool {
        match &self.lease {
            Some(lease) => self.engine.manager().holds(lease).await,
            None => true,
        }
    }

    /// Backoff before the next attempt, doubling per failure up to a minute
    fn backoff(&self) -> Duration {
        let base_delay = self
            .reconnect_delay_ms
            .saturating_mul(2u64.pow(self.reconnect_attempts.min(6)));
        Duration::from_millis(base_delay.min(MAX_BACKOFF_MS))
    }

    /// Run until the stream is no longer wanted; connection failures are retried forever
    pub async fn run(&mut self) {
        info!(stream = %self.kind.label(), "Starting stream consumer");

        loop {
            if !self.wanted().await {
                info!(stream = %self.kind.label(), "Stream no longer wanted, stopping");
                self.client.close().await;
                return;
            }

            // Reset reconnect attempts if we've been stable for a while
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {}
                Err(e) => {
                    warn!(stream = %self.kind.label(), error = %e, "WebSocket error");
                    self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);

                    if self.alert_after > 0 && self.reconnect_attempts == self.alert_after {
                        error!(
                            stream = %self.kind.label(),
                            attempts = self.reconnect_attempts,
                            "Stream degraded, still retrying"
                        );
                    }

                    let delay = self.backoff();
                    warn!(
                        stream = %self.kind.label(),
                        attempt = self.reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Connect and process messages until an error or until unwanted
    async fn connect_and_process(&mut self) -> Result<()> {
        self.client.connect().await?;

        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;

        let mut last_message = Instant::now();
        let keepalive_timeout = Duration::from_secs(KEEPALIVE_SECS);
        let recv_timeout = Duration::from_secs(RECV_TIMEOUT_SECS);

        loop {
            if !self.wanted().await {
                return Ok(());
            }

            match timeout(recv_timeout, self.client.recv()).await {
                Ok(Ok(Some(text))) => {
                    last_message = Instant::now();
                    let processed = match &self.lease {
                        Some(lease) => self.engine.process_leased(&text, lease).await,
                        None => self.engine.process_message(&text).await,
                    };
                    if let Err(e) = processed {
                        warn!(stream = %self.kind.label(), error = %e, "Failed to process message");
                    }
                }
                Ok(Ok(None)) => {
                    if last_message.elapsed() > keepalive_timeout {
                        if let Err(e) = self.client.ping().await {
                            warn!(error = %e, "Failed to send keepalive ping");
                        }
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        last_message_secs = last_message.elapsed().as_secs(),
                        "No message received within timeout, sending keepalive"
                    );
                    if let Err(e) = self.client.ping().await {
                        warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                        self.client.close().await;
                        return Err(MarketDataError::ConnectionTimeout);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotMode;
    use crate::metrics::Metrics;
    use crate::orderbook::OrderBookManager;
    use crate::publisher::Publisher;

    async fn engine() -> Arc<Engine> {
        let manager = Arc::new(OrderBookManager::default());
        let publisher = Arc::new(Publisher::new(16, None).await.unwrap());
        Arc::new(Engine::new(
            manager,
            publisher,
            Metrics::new().unwrap(),
            SnapshotMode::Merge,
        ))
    }

    #[test]
    fn test_stream_urls() {
        let endpoint = "wss://stream.binance.com:9443";
        let depth = StreamKind::Depth {
            symbol: "BTCUSDT".to_string(),
            with_ticker: false,
        };
        assert_eq!(
            depth.url(endpoint),
            "wss://stream.binance.com:9443/stream?streams=btcusdt@depth"
        );

        let with_ticker = StreamKind::Depth {
            symbol: "ETHUSDT".to_string(),
            with_ticker: true,
        };
        assert_eq!(
            with_ticker.url(endpoint),
            "wss://stream.binance.com:9443/stream?streams=ethusdt@depth/ethusdt@ticker"
        );

        assert_eq!(
            StreamKind::MarketTickers.url(endpoint),
            "wss://stream.binance.com:9443/ws/!ticker@arr"
        );
    }

    #[tokio::test]
    async fn test_backoff_is_capped() {
        let mut consumer =
            StreamConsumer::market_tickers("ws://127.0.0.1:9", engine().await, 1000, 0);
        assert_eq!(consumer.backoff(), Duration::from_millis(1000));

        consumer.reconnect_attempts = 3;
        assert_eq!(consumer.backoff(), Duration::from_millis(8000));

        consumer.reconnect_attempts = 20;
        assert_eq!(consumer.backoff(), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[tokio::test]
    async fn test_released_depth_consumer_exits() {
        let engine = engine().await;
        let lease = engine.track("BTCUSDT").await.unwrap().unwrap();
        engine.untrack("BTCUSDT").await;

        let mut consumer =
            StreamConsumer::depth(lease, false, "ws://127.0.0.1:9", engine, 1, 1);
        tokio::time::timeout(Duration::from_secs(1), consumer.run())
            .await
            .expect("consumer outlived its subscription");
    }

    #[tokio::test]
    async fn test_keeps_retrying_while_subscribed() {
        let engine = engine().await;
        let lease = engine.track("BTCUSDT").await.unwrap().unwrap();

        // nothing listens on the discard port
        let mut consumer = StreamConsumer::depth(
            lease,
            false,
            "ws://127.0.0.1:9",
            Arc::clone(&engine),
            1,
            2,
        );
        let task = tokio::spawn(async move { consumer.run().await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());

        engine.untrack("BTCUSDT").await;
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("consumer kept running after unsubscribe")
            .unwrap();
    }

    #[tokio::test]
    async fn test_replaced_subscription_stops_old_consumer() {
        let engine = engine().await;
        let first = engine.track("BTCUSDT").await.unwrap().unwrap();
        engine.untrack("BTCUSDT").await;
        let second = engine.track("BTCUSDT").await.unwrap().unwrap();

        let mut stale =
            StreamConsumer::depth(first, false, "ws://127.0.0.1:9", Arc::clone(&engine), 1, 1);
        tokio::time::timeout(Duration::from_secs(1), stale.run())
            .await
            .expect("stale consumer kept running");

        assert!(engine.manager().holds(&second).await);
    }
}
