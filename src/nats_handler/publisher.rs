//! Ranking publish target over NATS

use crate::valuation::{RankingEntry, RankingPublisher};

use async_nats::Client;
use async_trait::async_trait;

pub const RANKING_UPSERT_SUBJECT: &str = "ranking.upsert";

pub struct NatsRankingPublisher {
    client: Client,
}

impl NatsRankingPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RankingPublisher for NatsRankingPublisher {
    async fn publish(&self, entry: RankingEntry) {
        let payload = match serde_json::to_vec(&entry) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(user = %entry.user_id, error = %e, "Failed to encode ranking entry");
                return;
            }
        };

        if let Err(e) = self
            .client
            .publish(RANKING_UPSERT_SUBJECT.to_string(), payload.into())
            .await
        {
            tracing::warn!(user = %entry.user_id, error = %e, "Failed to publish ranking entry");
        }
    }
}
