//! Append-only Transaction Ledger
//! Every committed trade leaves exactly one record; records are never mutated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: i64,
    pub price: Decimal,
    pub total_value: Decimal,
    pub timestamp: DateTime<Utc>,

    /// Realized P/L against the average cost at the moment of sale (SELL only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_loss: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_loss_percent: Option<Decimal>,
}

impl Transaction {
    pub(crate) fn buy(symbol: &str, quantity: i64, price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            quantity,
            price,
            total_value: Decimal::from(quantity) * price,
            timestamp: Utc::now(),
            profit_loss: None,
            profit_loss_percent: None,
        }
    }

    pub(crate) fn sell(symbol: &str, quantity: i64, price: Decimal, avg_cost: Decimal) -> Self {
        let profit_loss = (price - avg_cost) * Decimal::from(quantity);
        let profit_loss_percent = if avg_cost > Decimal::ZERO {
            (price - avg_cost) / avg_cost * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        Self {
            side: TradeSide::Sell,
            profit_loss: Some(profit_loss),
            profit_loss_percent: Some(profit_loss_percent),
            ..Self::buy(symbol, quantity, price)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionLedger {
    entries: Vec<Transaction>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, transaction: Transaction) {
        self.entries.push(transaction);
    }

    /// Transactions in execution order
    pub fn entries(&self) -> &[Transaction] {
        &self.entries
    }

    pub fn newest_first(&self) -> Vec<Transaction> {
        self.entries.iter().rev().cloned().collect()
    }

    pub fn for_symbol(&self, symbol: &str) -> Vec<Transaction> {
        let symbol = symbol.trim().to_ascii_uppercase();
        self.entries
            .iter()
            .filter(|t| t.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Sum of realized P/L across all sells
    pub fn realized_pnl(&self) -> Decimal {
        self.entries.iter().filter_map(|t| t.profit_loss).sum()
    }

    pub fn last(&self) -> Option<&Transaction> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
