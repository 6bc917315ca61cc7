//! Prometheus metrics for the reconciliation pipeline

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::{MarketDataError, Result};

/// Process-wide counters, owned by a private registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Stream messages received, by kind (depth, ticker, unknown)
    pub messages_total: IntCounterVec,
    /// Messages dropped, by reason (unknown_symbol, empty, malformed)
    pub dropped_total: IntCounterVec,
    /// Levels deleted, by cause (zero_quantity, purged, pruned)
    pub levels_removed_total: IntCounterVec,
    /// Fallback snapshot passes, by outcome (applied, failed)
    pub snapshot_passes_total: IntCounterVec,
    pub lock_timeouts_total: IntCounter,
    pub active_symbols: IntGauge,
    pub reconcile_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("orderbook_watch".to_string()), None)?;

        let messages_total = IntCounterVec::new(
            Opts::new("stream_messages_total", "Stream messages received"),
            &["kind"],
        )?;
        let dropped_total = IntCounterVec::new(
            Opts::new("dropped_messages_total", "Messages dropped before reconciliation"),
            &["reason"],
        )?;
        let levels_removed_total = IntCounterVec::new(
            Opts::new("levels_removed_total", "Price levels deleted from the store"),
            &["cause"],
        )?;
        let snapshot_passes_total = IntCounterVec::new(
            Opts::new("snapshot_passes_total", "Fallback snapshot passes"),
            &["outcome"],
        )?;
        let lock_timeouts_total =
            IntCounter::new("lock_timeouts_total", "Per-symbol lock acquisitions that timed out")?;
        let active_symbols = IntGauge::new("active_symbols", "Symbols currently tracked")?;
        let reconcile_seconds = Histogram::with_opts(
            HistogramOpts::new("reconcile_seconds", "Time spent on book lookup, lock wait and reconciliation")
                .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01]),
        )?;

        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(dropped_total.clone()))?;
        registry.register(Box::new(levels_removed_total.clone()))?;
        registry.register(Box::new(snapshot_passes_total.clone()))?;
        registry.register(Box::new(lock_timeouts_total.clone()))?;
        registry.register(Box::new(active_symbols.clone()))?;
        registry.register(Box::new(reconcile_seconds.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            dropped_total,
            levels_removed_total,
            snapshot_passes_total,
            lock_timeouts_total,
            active_symbols,
            reconcile_seconds,
        })
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MarketDataError::Metrics(e.to_string()))
    }
}
