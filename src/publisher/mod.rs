//! Publisher module
//!
//! Fans materialized order book states and price updates out to viewers
//! through a broadcast channel, and optionally mirrors them to a Unix
//! socket for other system components.

use bytes::{BufMut, Bytes, BytesMut};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};
use crate::orderbook::OrderBookState;
use crate::parser::TickerEvent;

/// Last-price notification for one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: Decimal,
    /// 24h change in percent
    pub change: Decimal,
    /// 24h quote volume
    pub volume: Decimal,
    /// Event time in milliseconds
    pub time: u64,
}

impl From<&TickerEvent> for PriceUpdate {
    fn from(ticker: &TickerEvent) -> Self {
        Self {
            symbol: ticker.symbol.clone(),
            price: ticker.last_price,
            change: ticker.price_change_percent,
            volume: ticker.quote_volume,
            time: ticker.event_time,
        }
    }
}

/// Event delivered to viewers, serialized as `{"event": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    PriceUpdate(PriceUpdate),
    OrderbookUpdate(OrderBookState),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::PriceUpdate(_) => "price_update",
            PushEvent::OrderbookUpdate(_) => "orderbook_update",
        }
    }
}

/// Length-prefixed MessagePack sink over a Unix socket
struct IpcSink {
    socket_path: String,
    stream: Mutex<Option<UnixStream>>,
}

impl IpcSink {
    /// Connect to the Unix socket
    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(MarketDataError::IpcError(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            MarketDataError::IpcError(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    async fn send(&self, event: &PushEvent) -> Result<()> {
        let message = frame(event)?;

        let mut guard = self.stream.lock().await;

        // Check if we need to reconnect
        if guard.is_none() {
            drop(guard);
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to IPC socket");
                return Ok(()); // Don't fail on publish errors
            }
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            if let Err(e) = stream.write_all(&message).await {
                warn!(error = %e, "Failed to write to IPC socket");
                *guard = None; // Mark as disconnected
            }
        }

        Ok(())
    }
}

/// u32 big-endian length prefix followed by the MessagePack body
fn frame(event: &PushEvent) -> Result<Bytes> {
    let data = rmp_serde::to_vec_named(event).map_err(|e| {
        MarketDataError::SerializationError(format!("Failed to serialize: {}", e))
    })?;

    let mut message = BytesMut::with_capacity(4 + data.len());
    message.put_u32(data.len() as u32);
    message.extend_from_slice(&data);
    Ok(message.freeze())
}

/// Publisher for order book and price events
pub struct Publisher {
    tx: broadcast::Sender<PushEvent>,
    ipc: Option<IpcSink>,
}

impl Publisher {
    /// Create a new publisher with an optional IPC mirror
    pub async fn new(capacity: usize, ipc_socket_path: Option<&str>) -> Result<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let ipc = ipc_socket_path.map(|path| IpcSink {
            socket_path: path.to_string(),
            stream: Mutex::new(None),
        });

        if let Some(sink) = &ipc {
            // May fail if the consumer isn't ready yet
            if let Err(e) = sink.connect().await {
                warn!(error = %e, "Initial IPC connection failed, will retry on publish");
            }
        }

        Ok(Self { tx, ipc })
    }

    /// Receiver for a new viewer; lagging viewers lose the oldest events
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event to all viewers and the IPC mirror.
    ///
    /// Having no viewers connected is not an error.
    pub async fn publish(&self, event: PushEvent) -> Result<()> {
        if let Some(sink) = &self.ipc {
            sink.send(&event).await?;
        }

        let name = event.name();
        match self.tx.send(event) {
            Ok(viewers) => debug!(event = name, viewers, "Published event"),
            Err(_) => debug!(event = name, "No viewers connected"),
        }
        Ok(())
    }
}
