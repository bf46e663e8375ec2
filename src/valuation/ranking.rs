//! Ranking Table
//! Derived view over the latest entry per user, ordered by portfolio value.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub user_id: String,
    pub display_name: String,
    pub portfolio_value: Decimal,
    pub daily_change_percent: Decimal,
    /// 1-based rank; 0 until computed by [`RankingTable::rank`]
    #[serde(default)]
    pub position: usize,
}

impl RankingEntry {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        portfolio_value: Decimal,
        daily_change_percent: Decimal,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            portfolio_value,
            daily_change_percent,
            position: 0,
        }
    }

    /// "#3. Name" once ranked, the bare name otherwise
    pub fn label(&self) -> String {
        if self.position > 0 {
            format!("#{}. {}", self.position, self.display_name)
        } else {
            self.display_name.clone()
        }
    }
}

/// Where revaluation cycles publish their entry
#[async_trait]
pub trait RankingPublisher: Send + Sync {
    async fn publish(&self, entry: RankingEntry);
}

/// Entries are kept in first-insertion order so that equal values rank
/// by who appeared first.
#[derive(Debug, Default)]
pub struct RankingTable {
    entries: RwLock<Vec<RankingEntry>>,
}

impl RankingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `entry.user_id`, or append a new one
    pub async fn upsert(&self, mut entry: RankingEntry) {
        entry.position = 0;
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.user_id == entry.user_id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    /// All entries by descending value with positions assigned
    pub async fn rank(&self) -> Vec<RankingEntry> {
        let mut ranked = self.entries.read().await.clone();
        // Stable: ties keep insertion order
        ranked.sort_by(|a, b| b.portfolio_value.cmp(&a.portfolio_value));
        for (index, entry) in ranked.iter_mut().enumerate() {
            entry.position = index + 1;
        }
        ranked
    }

    pub async fn top(&self, n: usize) -> Vec<RankingEntry> {
        let mut ranked = self.rank().await;
        ranked.truncate(n);
        ranked
    }

    pub async fn position_of(&self, user_id: &str) -> Option<usize> {
        self.standing(user_id).await.map(|e| e.position)
    }

    /// The user's ranked entry, wherever it falls
    pub async fn standing(&self, user_id: &str) -> Option<RankingEntry> {
        self.rank().await.into_iter().find(|e| e.user_id == user_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RankingPublisher for RankingTable {
    async fn publish(&self, entry: RankingEntry) {
        tracing::debug!(
            user = %entry.user_id,
            value = %entry.portfolio_value,
            "Ranking entry upserted"
        );
        self.upsert(entry).await;
    }
}
