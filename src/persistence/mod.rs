//! Persistence Collaborator
//! Flat, write-only records emitted after each committed trade and each
//! revaluation cycle. Sinks are fire-and-forget; in-memory state never waits
//! on them.

mod postgres;

pub use postgres::PgPersistence;

use crate::engine::{Position, Transaction};
use crate::observability::metrics::metrics;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PersistenceRecord {
    /// Quantity 0 means the position was closed and should be removed
    #[serde(rename_all = "camelCase")]
    Position {
        user_id: String,
        symbol: String,
        quantity: i64,
        avg_cost: Decimal,
        invested_amount: Decimal,
    },

    #[serde(rename_all = "camelCase")]
    Portfolio {
        user_id: String,
        portfolio_value: Decimal,
        daily_change_percent: Decimal,
    },

    #[serde(rename_all = "camelCase")]
    Transaction {
        user_id: String,
        #[serde(flatten)]
        transaction: Transaction,
    },
}

impl PersistenceRecord {
    pub fn position(user_id: &str, position: &Position) -> Self {
        PersistenceRecord::Position {
            user_id: user_id.to_string(),
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            avg_cost: position.avg_cost,
            invested_amount: position.invested_amount,
        }
    }

    pub fn closed_position(user_id: &str, symbol: &str) -> Self {
        PersistenceRecord::Position {
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            quantity: 0,
            avg_cost: Decimal::ZERO,
            invested_amount: Decimal::ZERO,
        }
    }

    pub fn transaction(user_id: &str, transaction: &Transaction) -> Self {
        PersistenceRecord::Transaction {
            user_id: user_id.to_string(),
            transaction: transaction.clone(),
        }
    }

    pub fn portfolio(user_id: &str, portfolio_value: Decimal, daily_change_percent: Decimal) -> Self {
        PersistenceRecord::Portfolio {
            user_id: user_id.to_string(),
            portfolio_value,
            daily_change_percent,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceRecord::Position { .. } => "position",
            PersistenceRecord::Portfolio { .. } => "portfolio",
            PersistenceRecord::Transaction { .. } => "transaction",
        }
    }
}

/// Write-only target for persistence records
pub trait PersistenceSink: Send + Sync {
    /// Must not block; failures are the sink's problem
    fn emit(&self, record: PersistenceRecord);
}

/// Sink that only traces records (used when no database is configured)
#[derive(Debug, Default, Clone)]
pub struct LogPersistence;

impl PersistenceSink for LogPersistence {
    fn emit(&self, record: PersistenceRecord) {
        count_record(&record);
        match serde_json::to_string(&record) {
            Ok(json) => tracing::debug!(kind = record.kind(), record = %json, "Persistence record"),
            Err(e) => tracing::warn!(kind = record.kind(), error = %e, "Unserializable persistence record"),
        }
    }
}

pub(crate) fn count_record(record: &PersistenceRecord) {
    if let Some(m) = metrics() {
        m.persistence_records_total
            .with_label_values(&[record.kind()])
            .inc();
    }
}
