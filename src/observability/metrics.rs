//! Prometheus Metrics for the Portfolio Engine
//! Trade execution, price cache, gateway health, and revaluation metrics.
//!
//! Library code records through [`metrics()`], which is `None` until the
//! service calls [`init_metrics`]; tests and embedders pay nothing.

use once_cell::sync::{Lazy, OnceCell};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static METRICS: OnceCell<Metrics> = OnceCell::new();

pub struct Metrics {
    pub trades_executed_total: CounterVec,
    pub trades_rejected_total: CounterVec,
    pub trade_execution_duration: HistogramVec,
    pub price_lookups_total: CounterVec,
    pub gateway_circuit_state: GaugeVec,
    pub revaluation_runs_total: CounterVec,
    pub portfolio_value: GaugeVec,
    pub active_positions: GaugeVec,
    pub persistence_records_total: CounterVec,
    pub nats_messages_received: CounterVec,
}

impl Metrics {
    pub fn set_portfolio_value(&self, user_id: &str, value: Decimal) {
        self.portfolio_value
            .with_label_values(&[user_id])
            .set(value.to_f64().unwrap_or_default());
    }
}

/// Initialize metrics. Calling it again is a no-op.
pub fn init_metrics(service_name: &str) -> anyhow::Result<()> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let trades_executed_total = CounterVec::new(
        Opts::new("trades_executed_total", "Total trades committed")
            .namespace("portfolio")
            .const_label("service", service_name),
        &["side"],
    )?;

    let trades_rejected_total = CounterVec::new(
        Opts::new("trades_rejected_total", "Total trades rejected")
            .namespace("portfolio")
            .const_label("service", service_name),
        &["side", "reason"],
    )?;

    let trade_execution_duration = HistogramVec::new(
        HistogramOpts::new(
            "trade_execution_duration_seconds",
            "Trade validation + apply latency in seconds",
        )
            .namespace("portfolio")
            .const_label("service", service_name)
            .buckets(vec![0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        &["side"],
    )?;

    let price_lookups_total = CounterVec::new(
        Opts::new("price_lookups_total", "Price cache lookups")
            .namespace("portfolio"),
        &["path", "outcome"], // path: async|blocking, outcome: hit|fetched|unavailable
    )?;

    let gateway_circuit_state = GaugeVec::new(
        Opts::new(
            "gateway_circuit_state",
            "Market data circuit breaker state (0=closed, 0.5=half-open, 1=open)",
        )
            .namespace("portfolio"),
        &["name"],
    )?;

    let revaluation_runs_total = CounterVec::new(
        Opts::new("revaluation_runs_total", "Revaluation cycles by outcome")
            .namespace("portfolio"),
        &["outcome"], // completed|stale|skipped
    )?;

    let portfolio_value = GaugeVec::new(
        Opts::new("value", "Last published portfolio value").namespace("portfolio"),
        &["user"],
    )?;

    let active_positions = GaugeVec::new(
        Opts::new("active_positions", "Open positions per user").namespace("portfolio"),
        &["user"],
    )?;

    let persistence_records_total = CounterVec::new(
        Opts::new("persistence_records_total", "Records emitted to persistence")
            .namespace("portfolio"),
        &["kind"],
    )?;

    let nats_messages_received = CounterVec::new(
        Opts::new("nats_messages_received_total", "NATS messages received")
            .namespace("portfolio"),
        &["subject"],
    )?;

    REGISTRY.register(Box::new(trades_executed_total.clone()))?;
    REGISTRY.register(Box::new(trades_rejected_total.clone()))?;
    REGISTRY.register(Box::new(trade_execution_duration.clone()))?;
    REGISTRY.register(Box::new(price_lookups_total.clone()))?;
    REGISTRY.register(Box::new(gateway_circuit_state.clone()))?;
    REGISTRY.register(Box::new(revaluation_runs_total.clone()))?;
    REGISTRY.register(Box::new(portfolio_value.clone()))?;
    REGISTRY.register(Box::new(active_positions.clone()))?;
    REGISTRY.register(Box::new(persistence_records_total.clone()))?;
    REGISTRY.register(Box::new(nats_messages_received.clone()))?;

    let metrics = Metrics {
        trades_executed_total,
        trades_rejected_total,
        trade_execution_duration,
        price_lookups_total,
        gateway_circuit_state,
        revaluation_runs_total,
        portfolio_value,
        active_positions,
        persistence_records_total,
        nats_messages_received,
    };

    if METRICS.set(metrics).is_err() {
        tracing::debug!("Metrics already initialized by a concurrent caller");
    }

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Metrics instance, if initialized
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Encode metrics to Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
