//! Portfolio Core - Paper-Trading Portfolio & Valuation Engine
//!
//! Position ledger, trade execution, transaction ledger, a TTL price cache
//! over an injected market data gateway, periodic revaluation, and ranking.
//! The NATS, Postgres, and HTTP pieces are adapters used by the service binary.

pub mod config;
pub mod engine;
pub mod market;
pub mod nats_handler;
pub mod observability;
pub mod persistence;
pub mod resilience;
pub mod session;
pub mod valuation;

pub use engine::{
    Position, PositionLedger, TradeEngine, TradeError, TradeReceipt, TradeRequest, TradeSide,
    Transaction, TransactionLedger,
};
pub use market::{GatewayError, GatewayQuote, MarketDataGateway, PriceCache, PriceCacheConfig, PriceError};
pub use persistence::{PersistenceRecord, PersistenceSink};
pub use session::{Session, SessionConfig, SessionError, SessionManager, INITIAL_CASH};
pub use valuation::{
    RankingEntry, RankingPublisher, RankingTable, RevaluationOutcome, RevaluationScheduler,
    SchedulerConfig,
};
