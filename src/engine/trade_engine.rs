//! Trade Execution Engine
//! Validate -> Apply -> Record. A trade either fully commits (cash, ledger,
//! transaction record) or is rejected with no side effects.

use crate::engine::error::{normalize_symbol, TradeError};
use crate::engine::position_ledger::{Position, PositionLedger};
use crate::engine::transaction_ledger::{TradeSide, Transaction, TransactionLedger};
use crate::observability::metrics::metrics;
use crate::persistence::{PersistenceRecord, PersistenceSink};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::instrument;

// =====================================================
// TRADE REQUEST / RECEIPT
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: i64,
    /// Execution price; when absent the caller resolves a market price first
    #[serde(default, alias = "price")]
    pub price_hint: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeReceipt {
    pub transaction: Transaction,
    pub cash_balance: Decimal,
    /// Position after the trade, `None` when a sell closed it
    pub position: Option<Position>,
}

/// Consistent copy of an account at one instant
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub user_id: String,
    pub cash_balance: Decimal,
    pub positions: Vec<Position>,
    pub realized_pnl: Decimal,
}

struct Account {
    cash: Decimal,
    positions: PositionLedger,
    transactions: TransactionLedger,
}

// =====================================================
// TRADE ENGINE
// =====================================================

/// Single-writer trade engine for one user. All trades for the account are
/// serialized through one lock.
pub struct TradeEngine {
    user_id: String,
    account: Mutex<Account>,
    persistence: Arc<dyn PersistenceSink>,
}

impl TradeEngine {
    pub fn new(
        user_id: impl Into<String>,
        initial_cash: Decimal,
        persistence: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            account: Mutex::new(Account {
                cash: initial_cash,
                positions: PositionLedger::new(),
                transactions: TransactionLedger::new(),
            }),
            persistence,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn execute(&self, request: &TradeRequest) -> Result<TradeReceipt, TradeError> {
        let price = request.price_hint.ok_or_else(|| {
            TradeError::InvalidOrder("an execution price is required".into())
        })?;
        match request.side {
            TradeSide::Buy => self.buy(&request.symbol, request.quantity, price).await,
            TradeSide::Sell => self.sell(&request.symbol, request.quantity, price).await,
        }
    }

    #[instrument(skip(self), fields(user = %self.user_id))]
    pub async fn buy(
        &self,
        symbol: &str,
        quantity: i64,
        price_hint: Decimal,
    ) -> Result<TradeReceipt, TradeError> {
        let started = Instant::now();
        let result = self.apply_buy(symbol, quantity, price_hint).await;
        self.observe(TradeSide::Buy, started, &result);
        result
    }

    #[instrument(skip(self), fields(user = %self.user_id))]
    pub async fn sell(
        &self,
        symbol: &str,
        quantity: i64,
        price_hint: Decimal,
    ) -> Result<TradeReceipt, TradeError> {
        let started = Instant::now();
        let result = self.apply_sell(symbol, quantity, price_hint).await;
        self.observe(TradeSide::Sell, started, &result);
        result
    }

    async fn apply_buy(
        &self,
        symbol: &str,
        quantity: i64,
        price: Decimal,
    ) -> Result<TradeReceipt, TradeError> {
        let symbol = normalize_symbol(symbol)?;
        let cost = order_value(quantity, price)?;

        let receipt = {
            let mut account = self.account.lock().await;

            if cost > account.cash {
                return Err(TradeError::InsufficientFunds {
                    required: cost,
                    available: account.cash,
                });
            }

            // Ledger validates before mutating; cash only moves once it succeeds
            let position = account.positions.apply_buy(&symbol, quantity, price)?;
            account.cash -= cost;

            let transaction = Transaction::buy(&symbol, quantity, price);
            account.transactions.append(transaction.clone());

            let receipt = TradeReceipt {
                transaction,
                cash_balance: account.cash,
                position: Some(position),
            };
            // Emitted under the lock so records leave in commit order
            self.emit_trade(&receipt);
            receipt
        };

        tracing::info!(
            symbol = %symbol,
            quantity = quantity,
            price = %price,
            cash = %receipt.cash_balance,
            "Buy executed"
        );

        Ok(receipt)
    }

    async fn apply_sell(
        &self,
        symbol: &str,
        quantity: i64,
        price: Decimal,
    ) -> Result<TradeReceipt, TradeError> {
        let symbol = normalize_symbol(symbol)?;
        let proceeds = order_value(quantity, price)?;

        let receipt = {
            let mut account = self.account.lock().await;

            let new_cash = account
                .cash
                .checked_add(proceeds)
                .ok_or_else(|| TradeError::InvalidOrder("cash balance overflow".into()))?;

            // Realized P/L uses the average cost from before the sell is applied
            let outcome = account.positions.apply_sell(&symbol, quantity)?;
            account.cash = new_cash;

            let transaction = Transaction::sell(&symbol, quantity, price, outcome.avg_cost_at_sale);
            account.transactions.append(transaction.clone());

            let receipt = TradeReceipt {
                transaction,
                cash_balance: account.cash,
                position: outcome.remaining,
            };
            self.emit_trade(&receipt);
            receipt
        };

        tracing::info!(
            symbol = %symbol,
            quantity = quantity,
            price = %price,
            realized_pnl = %receipt.transaction.profit_loss.unwrap_or_default(),
            cash = %receipt.cash_balance,
            "Sell executed"
        );

        Ok(receipt)
    }

    fn emit_trade(&self, receipt: &TradeReceipt) {
        let position_record = match &receipt.position {
            Some(position) => PersistenceRecord::position(&self.user_id, position),
            None => PersistenceRecord::closed_position(&self.user_id, &receipt.transaction.symbol),
        };
        self.persistence.emit(position_record);
        self.persistence
            .emit(PersistenceRecord::transaction(&self.user_id, &receipt.transaction));
    }

    fn observe(&self, side: TradeSide, started: Instant, result: &Result<TradeReceipt, TradeError>) {
        let side_label = match side {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        };

        if let Err(e) = result {
            tracing::warn!(side = side_label, reason = e.code(), error = %e, "Trade rejected");
        }

        let Some(m) = metrics() else { return };
        m.trade_execution_duration
            .with_label_values(&[side_label])
            .observe(started.elapsed().as_secs_f64());
        match result {
            Ok(_) => m.trades_executed_total.with_label_values(&[side_label]).inc(),
            Err(e) => m
                .trades_rejected_total
                .with_label_values(&[side_label, e.code()])
                .inc(),
        }
    }

    // =====================================================
    // QUERIES
    // =====================================================

    pub async fn cash_balance(&self) -> Decimal {
        self.account.lock().await.cash
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.account.lock().await.positions.get(symbol).cloned()
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.account.lock().await.positions.snapshot()
    }

    /// Transactions in execution order
    pub async fn transactions(&self) -> Vec<Transaction> {
        self.account.lock().await.transactions.entries().to_vec()
    }

    pub async fn transaction_history(&self) -> Vec<Transaction> {
        self.account.lock().await.transactions.newest_first()
    }

    pub async fn transactions_for(&self, symbol: &str) -> Vec<Transaction> {
        self.account.lock().await.transactions.for_symbol(symbol)
    }

    pub async fn realized_pnl(&self) -> Decimal {
        self.account.lock().await.transactions.realized_pnl()
    }

    /// Emit a record for every open position, in order with trade records
    pub async fn persist_positions(&self) -> usize {
        let account = self.account.lock().await;
        let positions = account.positions.snapshot();
        for position in &positions {
            self.persistence
                .emit(PersistenceRecord::position(&self.user_id, position));
        }
        positions.len()
    }

    pub async fn snapshot(&self) -> AccountSnapshot {
        let account = self.account.lock().await;
        AccountSnapshot {
            user_id: self.user_id.clone(),
            cash_balance: account.cash,
            positions: account.positions.snapshot(),
            realized_pnl: account.transactions.realized_pnl(),
        }
    }
}

fn order_value(quantity: i64, price: Decimal) -> Result<Decimal, TradeError> {
    if quantity <= 0 {
        return Err(TradeError::InvalidOrder(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    if price <= Decimal::ZERO {
        return Err(TradeError::InvalidOrder(format!(
            "price must be positive, got {}",
            price
        )));
    }
    Decimal::from(quantity)
        .checked_mul(price)
        .ok_or_else(|| TradeError::InvalidOrder("order value overflow".into()))
}
