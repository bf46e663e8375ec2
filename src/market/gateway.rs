//! Market Data Gateway seam
//! "Given a symbol, return a current price or a failure." Latency is unbounded;
//! callers wrap it in the price cache's timeout discipline.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayQuote {
    pub price: Decimal,
    #[serde(default)]
    pub previous_close: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no quote for {0}")]
    NoQuote(String),

    #[error("malformed quote: {0}")]
    Malformed(String),

    #[error("gateway did not answer within {0:?}")]
    Timeout(Duration),

    #[error("symbol {0:?} cannot be requested")]
    InvalidSymbol(String),
}

#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    async fn fetch_price(&self, symbol: &str) -> Result<GatewayQuote, GatewayError>;
}
