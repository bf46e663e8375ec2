//! NATS Message Handler
//! Handles trade submission, portfolio queries, and ranking queries

use crate::engine::{Transaction, TradeRequest};
use crate::observability::metrics::metrics;
use crate::session::SessionManager;
use crate::valuation::{PortfolioSummary, RankingEntry};

use async_nats::{Client, Message};
use futures::StreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const TRADES_SUBMIT_SUBJECT: &str = "trades.submit";
pub const PORTFOLIO_QUERY_SUBJECT: &str = "portfolio.query";
pub const RANKING_QUERY_SUBJECT: &str = "ranking.query";

const DEFAULT_RANKING_LIMIT: usize = 20;

// =====================================================
// REQUEST TYPES
// =====================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeMessage {
    user_id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(flatten)]
    request: TradeRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioQuery {
    user_id: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RankingQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

// =====================================================
// RESPONSE TYPES
// =====================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TradeResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction: Option<Transaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cash_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TradeResponse {
    fn rejected(code: &str, error: String) -> Self {
        Self {
            success: false,
            transaction: None,
            cash_balance: None,
            code: Some(code.to_string()),
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<PortfolioSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    transactions: Vec<Transaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RankingResponse {
    success: bool,
    top: Vec<RankingEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    standing: Option<RankingEntry>,
    total: usize,
}

// =====================================================
// NATS SUBSCRIBER
// =====================================================

pub struct NatsSubscriber {
    client: Client,
    sessions: Arc<SessionManager>,
}

impl NatsSubscriber {
    pub fn new(client: Client, sessions: Arc<SessionManager>) -> Self {
        Self { client, sessions }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut trade_sub = self.client.subscribe(TRADES_SUBMIT_SUBJECT.to_string()).await?;
        let mut portfolio_sub = self.client.subscribe(PORTFOLIO_QUERY_SUBJECT.to_string()).await?;
        let mut ranking_sub = self.client.subscribe(RANKING_QUERY_SUBJECT.to_string()).await?;

        tracing::info!("NATS subscriber running");

        loop {
            tokio::select! {
                Some(msg) = trade_sub.next() => {
                    count_message(TRADES_SUBMIT_SUBJECT);
                    self.handle_trade(msg).await;
                }
                Some(msg) = portfolio_sub.next() => {
                    count_message(PORTFOLIO_QUERY_SUBJECT);
                    self.handle_portfolio_query(msg).await;
                }
                Some(msg) = ranking_sub.next() => {
                    count_message(RANKING_QUERY_SUBJECT);
                    self.handle_ranking_query(msg).await;
                }
                else => {
                    tracing::warn!("All NATS subscriptions closed");
                    return Ok(());
                }
            }
        }
    }

    // =====================================================
    // TRADE SUBMIT
    // =====================================================

    async fn handle_trade(&self, msg: Message) {
        let response = match serde_json::from_slice::<TradeMessage>(&msg.payload) {
            Ok(trade) => {
                let session = self
                    .sessions
                    .session(&trade.user_id, trade.display_name.as_deref())
                    .await;
                match session.trade(trade.request).await {
                    Ok(receipt) => TradeResponse {
                        success: true,
                        transaction: Some(receipt.transaction),
                        cash_balance: Some(receipt.cash_balance),
                        code: None,
                        error: None,
                    },
                    Err(e) => TradeResponse::rejected(e.code(), e.to_string()),
                }
            }
            Err(e) => TradeResponse::rejected("invalid_payload", format!("Invalid payload: {}", e)),
        };

        self.reply(&msg, &response).await;
    }

    // =====================================================
    // PORTFOLIO QUERY
    // =====================================================

    async fn handle_portfolio_query(&self, msg: Message) {
        let response = match serde_json::from_slice::<PortfolioQuery>(&msg.payload) {
            Ok(query) => {
                let session = self
                    .sessions
                    .session(&query.user_id, query.display_name.as_deref())
                    .await;
                PortfolioResponse {
                    success: true,
                    summary: Some(session.summary().await),
                    transactions: session.engine().transaction_history().await,
                    error: None,
                }
            }
            Err(e) => PortfolioResponse {
                success: false,
                summary: None,
                transactions: Vec::new(),
                error: Some(format!("Invalid payload: {}", e)),
            },
        };

        self.reply(&msg, &response).await;
    }

    // =====================================================
    // RANKING QUERY
    // =====================================================

    async fn handle_ranking_query(&self, msg: Message) {
        // An empty body asks for the default top list
        let query: RankingQuery = if msg.payload.is_empty() {
            RankingQuery::default()
        } else {
            serde_json::from_slice(&msg.payload).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid ranking query, using defaults");
                RankingQuery::default()
            })
        };

        let ranked = self.sessions.ranking().rank().await;
        let standing = query
            .user_id
            .as_deref()
            .and_then(|id| ranked.iter().find(|e| e.user_id == id).cloned());
        let total = ranked.len();
        let top = ranked
            .into_iter()
            .take(query.limit.unwrap_or(DEFAULT_RANKING_LIMIT))
            .collect();

        let response = RankingResponse {
            success: true,
            top,
            standing,
            total,
        };
        self.reply(&msg, &response).await;
    }

    async fn reply<T: Serialize>(&self, msg: &Message, response: &T) {
        let Some(reply) = msg.reply.clone() else { return };

        match serde_json::to_vec(response) {
            Ok(payload) => {
                if let Err(e) = self.client.publish(reply, payload.into()).await {
                    tracing::warn!(error = %e, "Failed to publish reply");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode reply"),
        }
    }
}

fn count_message(subject: &str) {
    if let Some(m) = metrics() {
        m.nats_messages_received.with_label_values(&[subject]).inc();
    }
}
