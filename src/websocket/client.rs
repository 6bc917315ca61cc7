//! WebSocket client for a single Binance stream URL

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the TCP + TLS + upgrade handshake
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// What a received frame means to the consumer
#[derive(Debug, PartialEq)]
enum Inbound {
    Payload(String),
    Ping(Vec<u8>),
    Ignored,
    Closed,
}

fn classify(message: Message) -> Result<Inbound> {
    match message {
        Message::Text(text) => Ok(Inbound::Payload(text)),
        Message::Binary(data) => String::from_utf8(data)
            .map(Inbound::Payload)
            .map_err(|e| MarketDataError::WebSocketMessage(format!("Non UTF-8 payload: {}", e))),
        Message::Ping(data) => Ok(Inbound::Ping(data)),
        Message::Pong(_) | Message::Frame(_) => Ok(Inbound::Ignored),
        Message::Close(frame) => {
            warn!(frame = ?frame, "Received close frame");
            Ok(Inbound::Closed)
        }
    }
}

pub struct WebSocketClient {
    stream: Option<WsStream>,
    url: String,
}

impl WebSocketClient {
    pub fn new(url: &str) -> Self {
        Self {
            stream: None,
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the connection, replacing any previous one
    pub async fn connect(&mut self) -> Result<()> {
        self.close().await;
        info!(url = %self.url, "Connecting to Binance WebSocket");

        let (ws_stream, response) =
            timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connect_async(&self.url))
                .await
                .map_err(|_| MarketDataError::ConnectionTimeout)?
                .map_err(|e| {
                    MarketDataError::WebSocketConnection(format!("Failed to connect: {}", e))
                })?;

        info!(status = ?response.status(), url = %self.url, "WebSocket connected");
        self.stream = Some(ws_stream);
        Ok(())
    }

    /// Next payload, or `Ok(None)` after a control frame.
    ///
    /// Pings are answered here. Close frames and transport errors drop the
    /// connection and surface as errors so the caller reconnects.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MarketDataError::WebSocketConnection("Not connected".to_string()))?;

        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                self.stream = None;
                return Err(MarketDataError::WebSocketMessage(e.to_string()));
            }
            None => {
                self.stream = None;
                return Err(MarketDataError::WebSocketConnection("Stream ended".to_string()));
            }
        };

        match classify(message)? {
            Inbound::Payload(text) => Ok(Some(text)),
            Inbound::Ping(data) => {
                debug!("Answering ping");
                stream.send(Message::Pong(data)).await?;
                Ok(None)
            }
            Inbound::Ignored => Ok(None),
            Inbound::Closed => {
                self.stream = None;
                Err(MarketDataError::WebSocketConnection("Connection closed".to_string()))
            }
        }
    }

    /// Keepalive ping; a no-op while disconnected
    pub async fn ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .send(Message::Ping(Vec::new()))
                .await
                .map_err(|e| MarketDataError::WebSocketMessage(e.to_string()))?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "Error while closing WebSocket");
            }
        }
    }
}
