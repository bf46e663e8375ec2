//! Health Check & Metrics HTTP Server
//! Provides /health, /health/live, /health/ready, /metrics endpoints

use crate::resilience::{CircuitBreaker, CircuitBreakerState};
use crate::session::SessionManager;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use super::metrics::encode_metrics;

#[derive(Clone)]
pub struct HealthState {
    /// `None` when persistence is log-only
    pub db_pool: Option<PgPool>,
    pub nats_connected: Arc<AtomicBool>,
    pub gateway_breaker: Arc<CircuitBreaker>,
    pub sessions: Arc<SessionManager>,
    pub ready: Arc<AtomicBool>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    active_sessions: usize,
    checks: HealthChecks,
}

#[derive(Serialize)]
struct HealthChecks {
    database: ComponentHealth,
    nats: ComponentHealth,
    market_data: ComponentHealth,
}

#[derive(Serialize)]
struct ComponentHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self { status: "healthy", latency_ms: None, detail: None }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", latency_ms: None, detail: Some(detail.into()) }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self { status: "unhealthy", latency_ms: None, detail: Some(detail.into()) }
    }
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

#[instrument(skip(state))]
pub async fn start_health_server(port: u16, state: HealthState) -> anyhow::Result<()> {
    START_TIME.get_or_init(Instant::now);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(port = port, "Health/metrics server started");

    axum::serve(listener, app).await?;
    Ok(())
}

#[instrument(skip(state))]
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let database = match &state.db_pool {
        None => ComponentHealth::degraded("persistence disabled, records are logged only"),
        Some(pool) => match check_database(pool).await {
            Ok(latency) => ComponentHealth {
                latency_ms: Some(latency),
                ..ComponentHealth::healthy()
            },
            Err(e) => ComponentHealth::unhealthy(e.to_string()),
        },
    };

    let nats = if state.nats_connected.load(Ordering::Relaxed) {
        ComponentHealth::healthy()
    } else {
        ComponentHealth::unhealthy("NATS not connected")
    };

    // An open breaker means stale valuations, not a dead service
    let market_data = match state.gateway_breaker.state() {
        CircuitBreakerState::Closed => ComponentHealth::healthy(),
        CircuitBreakerState::HalfOpen => ComponentHealth::degraded("circuit half-open"),
        CircuitBreakerState::Open => ComponentHealth::degraded("circuit open, prices unavailable"),
    };

    let overall_healthy = nats.status == "healthy" && database.status != "unhealthy";
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    let response = HealthResponse {
        status: if overall_healthy { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime,
        active_sessions: state.sessions.len().await,
        checks: HealthChecks { database, nats, market_data },
    };

    let status_code = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

async fn check_database(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let start = Instant::now();
    let _row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;
    Ok(start.elapsed().as_millis() as u64)
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

#[instrument(skip(state))]
async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    if !state.ready.load(Ordering::Relaxed) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "reason": "initializing" })),
        );
    }

    let db_ok = match &state.db_pool {
        Some(pool) => check_database(pool).await.is_ok(),
        None => true,
    };
    let nats_ok = state.nats_connected.load(Ordering::Relaxed);

    if db_ok && nats_ok {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": db_ok,
                "nats": nats_ok
            })),
        )
    }
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}
