//! Portfolio Core service
//! Hosts user sessions behind NATS with Postgres persistence and a
//! health/metrics endpoint.

use portfolio_core::config::Config;
use portfolio_core::nats_handler::{NatsQuoteGateway, NatsRankingPublisher, NatsSubscriber};
use portfolio_core::observability::{self, health::{start_health_server, HealthState}};
use portfolio_core::persistence::{LogPersistence, PersistenceSink, PgPersistence};
use portfolio_core::resilience::{with_retry_async, CircuitBreaker, RetryConfig};
use portfolio_core::session::{SessionDeps, SessionManager};
use portfolio_core::valuation::RankingTable;

use sqlx::postgres::PgPoolOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    observability::init_observability(&config.telemetry_config("portfolio-core"))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Portfolio Core...");

    let nats_connected = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(AtomicBool::new(false));

    // Persistence: Postgres when configured, log-only otherwise
    let (db_pool, persistence): (Option<sqlx::PgPool>, Arc<dyn PersistenceSink>) = match &config.database_url {
        Some(url) => {
            let pool = with_retry_async("database_connect", &RetryConfig::default(), || async {
                PgPoolOptions::new()
                    .min_connections(config.pool_min_connections)
                    .max_connections(config.pool_max_connections)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(url)
                    .await
            })
            .await?;

            let sink = PgPersistence::new(pool.clone());
            sink.migrate().await?;
            info!("Connected to PostgreSQL");
            (Some(pool), Arc::new(sink) as Arc<dyn PersistenceSink>)
        }
        None => {
            info!("DATABASE_URL not set, persistence records will be logged only");
            (None, Arc::new(LogPersistence) as Arc<dyn PersistenceSink>)
        }
    };

    let nats_client = with_retry_async("nats_connect", &RetryConfig::default(), || async {
        async_nats::connect(&config.nats_url).await
    })
    .await?;
    nats_connected.store(true, Ordering::Relaxed);
    info!(url = %config.nats_url, "Connected to NATS");

    let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));
    let deps = SessionDeps {
        gateway: Arc::new(NatsQuoteGateway::new(nats_client.clone())),
        breaker: Some(breaker.clone()),
        publisher: Arc::new(NatsRankingPublisher::new(nats_client.clone())),
        persistence,
    };
    let sessions = Arc::new(SessionManager::new(
        config.session_config(),
        Arc::new(RankingTable::new()),
        deps,
    ));

    let health_state = HealthState {
        db_pool,
        nats_connected: nats_connected.clone(),
        gateway_breaker: breaker,
        sessions: sessions.clone(),
        ready: ready.clone(),
    };
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(metrics_port, health_state).await {
            error!(error = %e, "Health server failed");
        }
    });

    let subscriber = NatsSubscriber::new(nats_client, sessions.clone());
    ready.store(true, Ordering::Relaxed);

    tokio::select! {
        result = subscriber.run() => {
            if let Err(e) = result {
                error!(error = %e, "Subscriber error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    ready.store(false, Ordering::Relaxed);
    sessions.shutdown().await;
    observability::shutdown_observability();
    info!("Portfolio Core stopped");
    Ok(())
}
