//! Observability: JSON logs, optional OTLP spans, Prometheus metrics, health

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use tracing_setup::TelemetryConfig;

use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,portfolio_core=debug";

/// Install the global subscriber and the metrics registry. Call once, from
/// inside the runtime (span export uses it).
pub fn init_observability(config: &TelemetryConfig) -> anyhow::Result<()> {
    metrics::init_metrics(&config.service_name)?;

    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = tracing_setup::init_tracer(config, endpoint)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(otel_layer)
        .init();

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        span_export = config.otlp_endpoint.is_some(),
        "Observability initialized"
    );
    Ok(())
}

/// Flush pending spans
pub fn shutdown_observability() {
    global::shutdown_tracer_provider();
}
