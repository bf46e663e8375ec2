//! Trading Engine Module
//! Position ledger, trade execution, and the transaction ledger

pub mod error;
pub mod position_ledger;
pub mod trade_engine;
pub mod transaction_ledger;

pub use error::TradeError;
pub use position_ledger::{Position, PositionLedger, SellOutcome};
pub use trade_engine::{AccountSnapshot, TradeEngine, TradeReceipt, TradeRequest};
pub use transaction_ledger::{TradeSide, Transaction, TransactionLedger};
