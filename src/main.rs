//! Orderbook Watch
//!
//! Connects to Binance streams, reconciles the books of subscribed symbols
//! and serves them over HTTP and WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orderbook_watch::{
    server, AppState, Config, Engine, MarketDirectory, Metrics, OrderBookManager, Publisher,
    RestClient, SnapshotSource, StreamConsumer, SubscriptionService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Orderbook Watch");

    let config = Arc::new(Config::load()?);
    info!(
        symbols = ?config.symbols,
        snapshot_mode = ?config.snapshot_mode,
        "Configuration loaded"
    );

    let metrics = Metrics::new()?;
    let publisher = Arc::new(
        Publisher::new(config.channel_capacity, config.ipc_socket_path.as_deref()).await?,
    );
    let manager = Arc::new(OrderBookManager::new(
        config.view_depth,
        config.max_subscriptions,
        Duration::from_millis(config.lock_timeout_ms),
    ));
    let engine = Arc::new(Engine::new(
        manager,
        publisher,
        metrics,
        config.snapshot_mode,
    ));

    let rest: Arc<dyn SnapshotSource> = Arc::new(RestClient::new(
        &config.rest_endpoint,
        Duration::from_millis(config.rest_timeout_ms),
    )?);

    let directory = Arc::new(MarketDirectory::new());
    if let Err(e) = directory.refresh(rest.as_ref()).await {
        warn!(error = %e, "Market listing unavailable, subscriptions are not validated");
    }

    let subscriptions = Arc::new(SubscriptionService::new(
        Arc::clone(&engine),
        Arc::clone(&rest),
        Arc::clone(&directory),
        Arc::clone(&config),
    ));
    for symbol in &config.symbols {
        if let Err(e) = subscriptions.subscribe(symbol).await {
            warn!(symbol = %symbol, error = %e, "Initial subscription failed");
        }
    }

    if config.market_ticker_stream {
        let mut tickers = StreamConsumer::market_tickers(
            &config.ws_endpoint,
            Arc::clone(&engine),
            config.reconnect_delay_ms,
            config.reconnect_alert_after,
        );
        tokio::spawn(async move { tickers.run().await });
    }

    let status_engine = Arc::clone(&engine);
    let status_interval = Duration::from_secs(config.health_check_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(status_interval);
        loop {
            interval.tick().await;
            status_engine.log_status().await;
        }
    });

    let state = Arc::new(AppState {
        engine,
        subscriptions,
        directory,
        config: Arc::clone(&config),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Orderbook Watch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
