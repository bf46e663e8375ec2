//! OpenTelemetry span export
//! Export is optional: without an OTLP endpoint the service logs JSON only.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// `None` disables span export
    pub otlp_endpoint: Option<String>,
    pub environment: String,
    /// Fraction of root traces kept, clamped to `[0, 1]`
    pub sample_ratio: f64,
}

impl TelemetryConfig {
    fn sampler(&self) -> sdktrace::Sampler {
        let ratio = self.sample_ratio.clamp(0.0, 1.0);
        if ratio >= 1.0 {
            sdktrace::Sampler::AlwaysOn
        } else {
            sdktrace::Sampler::ParentBased(Box::new(sdktrace::Sampler::TraceIdRatioBased(ratio)))
        }
    }
}

/// Batch OTLP tracer for `endpoint`
pub fn init_tracer(config: &TelemetryConfig, endpoint: &str) -> anyhow::Result<sdktrace::Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(sdktrace::RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", config.service_name.clone()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("service.namespace", "paper-trading"),
                    KeyValue::new("deployment.environment", config.environment.clone()),
                ])),
        )
        .install_batch(runtime::Tokio)?;

    tracing::info!(
        service = %config.service_name,
        otlp_endpoint = %endpoint,
        sample_ratio = config.sample_ratio,
        "Span export enabled"
    );

    Ok(tracer)
}
