//! User Sessions
//! One ledger, one price cache, and one revaluation scheduler per user. The
//! gateway, its circuit breaker, the ranking table, and the persistence sink
//! are shared.

use crate::engine::{TradeEngine, TradeError, TradeReceipt, TradeRequest};
use crate::market::{MarketDataGateway, PriceCache, PriceCacheConfig, PriceError};
use crate::persistence::PersistenceSink;
use crate::resilience::CircuitBreaker;
use crate::valuation::{
    PortfolioSummary, RankingPublisher, RankingTable, RevaluationScheduler, SchedulerConfig,
};

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Starting cash for every new account
pub const INITIAL_CASH: Decimal = dec!(10000);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub initial_cash: Decimal,
    pub price_cache: PriceCacheConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_cash: INITIAL_CASH,
            price_cache: PriceCacheConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Trade(#[from] TradeError),

    #[error(transparent)]
    Price(#[from] PriceError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Trade(e) => e.code(),
            SessionError::Price(_) => "price_unavailable",
        }
    }
}

/// Shared collaborators handed to every session
#[derive(Clone)]
pub struct SessionDeps {
    pub gateway: Arc<dyn MarketDataGateway>,
    pub breaker: Option<Arc<CircuitBreaker>>,
    pub publisher: Arc<dyn RankingPublisher>,
    pub persistence: Arc<dyn PersistenceSink>,
}

pub struct Session {
    user_id: String,
    display_name: String,
    engine: Arc<TradeEngine>,
    prices: PriceCache,
    scheduler: RevaluationScheduler,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        config: &SessionConfig,
        deps: &SessionDeps,
    ) -> Self {
        let user_id = user_id.into();
        let display_name = display_name.into();

        let engine = Arc::new(TradeEngine::new(
            user_id.clone(),
            config.initial_cash,
            deps.persistence.clone(),
        ));

        let mut prices = PriceCache::new(deps.gateway.clone(), config.price_cache.clone());
        if let Some(breaker) = &deps.breaker {
            prices = prices.with_circuit_breaker(breaker.clone());
        }

        let scheduler = RevaluationScheduler::new(
            engine.clone(),
            prices.clone(),
            deps.publisher.clone(),
            deps.persistence.clone(),
            display_name.clone(),
            config.initial_cash,
            config.scheduler.clone(),
        );

        Self {
            user_id,
            display_name,
            engine,
            prices,
            scheduler,
        }
    }

    /// Publish the starting ranking entry and start periodic revaluation
    pub async fn start(&self) {
        self.scheduler.announce().await;
        self.scheduler.start();
        info!(user = %self.user_id, name = %self.display_name, "Session started");
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn engine(&self) -> &Arc<TradeEngine> {
        &self.engine
    }

    pub fn prices(&self) -> &PriceCache {
        &self.prices
    }

    pub fn scheduler(&self) -> &RevaluationScheduler {
        &self.scheduler
    }

    /// Execute a trade; without a price hint the market price comes from the
    /// price cache first
    pub async fn trade(&self, mut request: TradeRequest) -> Result<TradeReceipt, SessionError> {
        if request.price_hint.is_none() {
            request.price_hint = Some(self.prices.get(&request.symbol).await?);
        }
        Ok(self.engine.execute(&request).await?)
    }

    /// Snapshot priced through the cache; unpriced holdings carry no value
    pub async fn summary(&self) -> PortfolioSummary {
        let snapshot = self.engine.snapshot().await;

        let lookups = snapshot.positions.iter().map(|p| async move {
            (p.symbol.clone(), self.prices.get(&p.symbol).await)
        });
        let prices: HashMap<String, Decimal> = join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(symbol, result)| result.ok().map(|price| (symbol, price)))
            .collect();

        PortfolioSummary::build(&snapshot, &prices)
    }
}

/// Publishes to every target in order
pub struct FanoutPublisher {
    targets: Vec<Arc<dyn RankingPublisher>>,
}

impl FanoutPublisher {
    pub fn new(targets: Vec<Arc<dyn RankingPublisher>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl RankingPublisher for FanoutPublisher {
    async fn publish(&self, entry: crate::valuation::RankingEntry) {
        for target in &self.targets {
            target.publish(entry.clone()).await;
        }
    }
}

/// Lazily creates and owns one [`Session`] per user
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    ranking: Arc<RankingTable>,
    deps: SessionDeps,
    config: SessionConfig,
}

impl SessionManager {
    /// `deps.publisher` receives entries in addition to the local ranking table
    pub fn new(config: SessionConfig, ranking: Arc<RankingTable>, deps: SessionDeps) -> Self {
        let publisher: Arc<dyn RankingPublisher> = Arc::new(FanoutPublisher::new(vec![
            ranking.clone() as Arc<dyn RankingPublisher>,
            deps.publisher.clone(),
        ]));

        Self {
            sessions: RwLock::new(HashMap::new()),
            ranking,
            deps: SessionDeps { publisher, ..deps },
            config,
        }
    }

    pub fn ranking(&self) -> &Arc<RankingTable> {
        &self.ranking
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Existing session, or a new started one named `display_name`
    /// (defaults to the user id)
    pub async fn session(&self, user_id: &str, display_name: Option<&str>) -> Arc<Session> {
        if let Some(session) = self.get(user_id).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(user_id) {
            return session.clone();
        }

        let session = Arc::new(Session::new(
            user_id,
            display_name.unwrap_or(user_id),
            &self.config,
            &self.deps,
        ));
        sessions.insert(user_id.to_string(), session.clone());
        drop(sessions);

        session.start().await;
        session
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Stop every session's scheduler
    pub async fn shutdown(&self) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            session.stop();
        }
        info!(sessions = sessions.len(), "All sessions stopped");
    }
}
