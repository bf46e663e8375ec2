//! Market data over NATS request/reply
//! Request `market.quote.<SYMBOL>` with an empty body; the quote service
//! replies `{"price": "...", "previousClose": "..."}` or `{"error": "..."}`.
//! The symbol is a single subject token: `.` is sent as `_` (`BRK.B` asks
//! `market.quote.BRK_B`), and wildcards or whitespace are refused.

use crate::market::{GatewayError, GatewayQuote, MarketDataGateway};

use async_nats::Client;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

pub const QUOTE_SUBJECT_PREFIX: &str = "market.quote";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteReply {
    price: Option<Decimal>,
    #[serde(default)]
    previous_close: Option<Decimal>,
    #[serde(default)]
    error: Option<String>,
}

pub struct NatsQuoteGateway {
    client: Client,
    subject_prefix: String,
}

impl NatsQuoteGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            subject_prefix: QUOTE_SUBJECT_PREFIX.to_string(),
        }
    }
}

fn quote_subject(prefix: &str, symbol: &str) -> Result<String, GatewayError> {
    let token: String = symbol
        .trim()
        .chars()
        .map(|c| if c == '.' { '_' } else { c.to_ascii_uppercase() })
        .collect();
    let valid = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(GatewayError::InvalidSymbol(symbol.to_string()));
    }
    Ok(format!("{}.{}", prefix, token))
}

#[async_trait]
impl MarketDataGateway for NatsQuoteGateway {
    async fn fetch_price(&self, symbol: &str) -> Result<GatewayQuote, GatewayError> {
        let subject = quote_subject(&self.subject_prefix, symbol)?;

        let msg = self
            .client
            .request(subject, Vec::new().into())
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let reply: QuoteReply = serde_json::from_slice(&msg.payload)
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        match reply {
            QuoteReply { price: Some(price), previous_close, .. } => Ok(GatewayQuote {
                price,
                previous_close,
            }),
            QuoteReply { error: Some(error), .. } => {
                tracing::debug!(symbol = %symbol, error = %error, "Quote service returned an error");
                Err(GatewayError::NoQuote(symbol.to_string()))
            }
            _ => Err(GatewayError::NoQuote(symbol.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_subject_is_one_token() {
        assert_eq!(quote_subject("market.quote", "aapl").unwrap(), "market.quote.AAPL");
        assert_eq!(quote_subject("market.quote", "BRK.B").unwrap(), "market.quote.BRK_B");
        assert_eq!(quote_subject("market.quote", "BF-B").unwrap(), "market.quote.BF-B");
    }

    #[test]
    fn test_wildcards_and_whitespace_refused() {
        for symbol in ["*", ">", "A.*", "AA PL", "", "  "] {
            assert_eq!(
                quote_subject("market.quote", symbol),
                Err(GatewayError::InvalidSymbol(symbol.to_string())),
                "{:?}",
                symbol
            );
        }
    }
}
