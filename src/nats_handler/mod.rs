//! NATS adapters: quote gateway, ranking publisher, and request subscriber

mod gateway;
mod publisher;
mod subscriber;

pub use gateway::{NatsQuoteGateway, QUOTE_SUBJECT_PREFIX};
pub use publisher::{NatsRankingPublisher, RANKING_UPSERT_SUBJECT};
pub use subscriber::{
    NatsSubscriber, PORTFOLIO_QUERY_SUBJECT, RANKING_QUERY_SUBJECT, TRADES_SUBMIT_SUBJECT,
};
