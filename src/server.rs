//! HTTP and viewer push surface
//!
//! JSON endpoints for health, metrics, the market directory and individual
//! books, plus a WebSocket that relays every published event to the viewer.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::error::MarketDataError;
use crate::markets::MarketPage;
use crate::orderbook::OrderBookState;
use crate::publisher::PushEvent;
use crate::AppState;

/// Errors surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Domain(#[from] MarketDataError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Domain(err) => match err {
                MarketDataError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
                MarketDataError::SubscriptionLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
                MarketDataError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the router with all routes and shared state
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/markets", get(markets))
        .route("/orderbook/:symbol", get(orderbook))
        .route(
            "/orderbook/:symbol/subscribe",
            post(subscribe).delete(unsubscribe),
        )
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "component": "orderbook-watch",
        "activeSymbols": state.engine.manager().len().await,
        "viewers": state.engine.publisher().viewer_count(),
        "maxSubscriptions": state.config.max_subscriptions,
        "snapshotMode": state.config.snapshot_mode,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> ApiResult<String> {
    Ok(state.engine.metrics().render()?)
}

#[derive(Debug, Deserialize)]
struct MarketQuery {
    #[serde(default = "first_page")]
    page: usize,
    #[serde(default = "default_per_page")]
    per_page: usize,
    search: Option<String>,
}

fn first_page() -> usize {
    1
}

fn default_per_page() -> usize {
    20
}

async fn markets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketQuery>,
) -> ApiResult<Json<MarketPage>> {
    if !state.directory.is_loaded().await {
        return Err(ApiError::ServiceUnavailable(
            "market listing not loaded".to_string(),
        ));
    }

    let page = state
        .directory
        .page(query.page, query.per_page, query.search.as_deref())
        .await;
    Ok(Json(page))
}

async fn orderbook(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<OrderBookState>> {
    let symbol = symbol.to_uppercase();
    match state.engine.manager().get_state(&symbol).await? {
        Some(book) => Ok(Json(book)),
        None => Err(ApiError::NotFound(format!("{} is not tracked", symbol))),
    }
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let symbol = symbol.to_uppercase();
    let created = state.subscriptions.subscribe(&symbol).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "symbol": symbol, "subscribed": true }))))
}

async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<StatusCode> {
    if state.subscriptions.unsubscribe(&symbol).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "{} is not tracked",
            symbol.to_uppercase()
        )))
    }
}

/// Inbound viewer command
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ViewerCommand {
    Subscribe { symbol: String },
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| viewer_loop(socket, state))
}

async fn viewer_loop(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.engine.publisher().subscribe();
    debug!(viewers = state.engine.publisher().viewer_count(), "Viewer connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Viewer lagging, oldest events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if handle_command(&mut socket, &state, &text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Viewer disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &PushEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to encode event");
            Ok(())
        }
    }
}

/// Apply a viewer command; the current book is pushed right away on success
async fn handle_command(
    socket: &mut WebSocket,
    state: &AppState,
    text: &str,
) -> Result<(), axum::Error> {
    let command = match serde_json::from_str::<ViewerCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed viewer command");
            return Ok(());
        }
    };

    match command {
        ViewerCommand::Subscribe { symbol } => {
            match state.subscriptions.subscribe(&symbol).await {
                Ok(_) => {
                    let symbol = symbol.to_uppercase();
                    if let Ok(Some(book)) = state.engine.manager().get_state(&symbol).await {
                        send_event(socket, &PushEvent::OrderbookUpdate(book)).await?;
                    }
                }
                Err(e) => {
                    let reply = json!({ "event": "error", "data": { "message": e.to_string() } });
                    socket.send(Message::Text(reply.to_string())).await?;
                }
            }
        }
    }
    Ok(())
}
