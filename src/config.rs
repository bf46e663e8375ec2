//! Configuration Module
//! Loads settings from environment variables

use crate::market::PriceCacheConfig;
use crate::observability::TelemetryConfig;
use crate::resilience::CircuitBreakerConfig;
use crate::session::{SessionConfig, INITIAL_CASH};
use crate::valuation::SchedulerConfig;

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    /// Span export is off when unset
    pub otlp_endpoint: Option<String>,
    pub trace_sample_ratio: f64,
    pub nats_url: String,
    /// Persistence is log-only when unset
    pub database_url: Option<String>,
    pub pool_min_connections: u32,
    pub pool_max_connections: u32,
    pub metrics_port: u16,
    pub initial_cash: Decimal,
    pub price_ttl: Duration,
    pub price_fetch_timeout: Duration,
    pub revaluation_interval: Duration,
    pub gateway_failure_threshold: u32,
    pub gateway_open_duration: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let initial_cash = match env::var("INITIAL_CASH") {
            Ok(raw) => Decimal::from_str(raw.trim())
                .map_err(|e| anyhow::anyhow!("INITIAL_CASH must be a decimal amount: {}", e))?,
            Err(_) => INITIAL_CASH,
        };
        if initial_cash < Decimal::ZERO {
            anyhow::bail!("INITIAL_CASH must not be negative");
        }

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let default_ratio = if environment == "production" { 0.1 } else { 1.0 };

        Ok(Self {
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|url| !url.is_empty()),
            trace_sample_ratio: parse_or("TRACE_SAMPLE_RATIO", default_ratio),
            environment,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            pool_min_connections: parse_or("POOL_MIN_CONNECTIONS", 2),
            pool_max_connections: parse_or("POOL_MAX_CONNECTIONS", 10),
            metrics_port: parse_or("METRICS_PORT", 9100),
            initial_cash,
            price_ttl: Duration::from_secs(parse_or("PRICE_TTL_SECS", 300)),
            price_fetch_timeout: positive_secs(
                "PRICE_FETCH_TIMEOUT_SECS",
                parse_or("PRICE_FETCH_TIMEOUT_SECS", 5),
            )?,
            revaluation_interval: positive_secs(
                "REVALUATION_INTERVAL_SECS",
                parse_or("REVALUATION_INTERVAL_SECS", 300),
            )?,
            gateway_failure_threshold: parse_or("GATEWAY_FAILURE_THRESHOLD", 5),
            gateway_open_duration: Duration::from_secs(parse_or("GATEWAY_OPEN_SECS", 30)),
        })
    }

    pub fn telemetry_config(&self, service_name: &str) -> TelemetryConfig {
        TelemetryConfig {
            service_name: service_name.to_string(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            environment: self.environment.clone(),
            sample_ratio: self.trace_sample_ratio,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            initial_cash: self.initial_cash,
            price_cache: PriceCacheConfig {
                ttl: self.price_ttl,
                fetch_timeout: self.price_fetch_timeout,
            },
            scheduler: SchedulerConfig {
                period: self.revaluation_interval,
            },
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: "market_data".to_string(),
            failure_threshold: self.gateway_failure_threshold,
            timeout: self.gateway_open_duration,
            ..CircuitBreakerConfig::default()
        }
    }
}

fn positive_secs(key: &str, secs: u64) -> anyhow::Result<Duration> {
    if secs == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
