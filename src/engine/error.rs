//! Trade rejection taxonomy
//! Returned synchronously to the caller; a rejected trade has no side effects.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: i64,
        held: i64,
    },
}

impl TradeError {
    /// Stable code used for metric labels and reply payloads
    pub fn code(&self) -> &'static str {
        match self {
            TradeError::InvalidOrder(_) => "invalid_order",
            TradeError::InsufficientFunds { .. } => "insufficient_funds",
            TradeError::InsufficientShares { .. } => "insufficient_shares",
        }
    }
}

/// Normalize a ticker symbol (trimmed, upper-case). Empty symbols are invalid,
/// as is anything outside ASCII letters, digits, `.` and `-`.
pub fn normalize_symbol(symbol: &str) -> Result<String, TradeError> {
    let normalized = symbol.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(TradeError::InvalidOrder("symbol must not be empty".into()));
    }
    if let Some(bad) = normalized
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
    {
        return Err(TradeError::InvalidOrder(format!(
            "symbol {:?} contains invalid character {:?}",
            normalized, bad
        )));
    }
    Ok(normalized)
}
