//! Postgres persistence sink
//! Records are queued to one writer task and written in emission order;
//! errors are logged only.

use super::{count_record, PersistenceRecord, PersistenceSink};
use sqlx::PgPool;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct PgPersistence {
    pool: PgPool,
    queue: mpsc::UnboundedSender<PersistenceRecord>,
}

impl PgPersistence {
    /// Spawns the writer task on the current runtime
    pub fn new(pool: PgPool) -> Self {
        let (queue, records) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_writer(pool.clone(), records));
        Self { pool, queue }
    }

    async fn run_writer(pool: PgPool, mut records: mpsc::UnboundedReceiver<PersistenceRecord>) {
        while let Some(record) = records.recv().await {
            match Self::write(&pool, &record).await {
                Ok(()) => count_record(&record),
                Err(e) => tracing::error!(kind = record.kind(), error = %e, "Failed to persist record"),
            }
        }
        tracing::debug!("Persistence writer stopped");
    }

    /// Create the tables the sink writes to
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS portfolio_positions (
                   user_id TEXT NOT NULL,
                   symbol TEXT NOT NULL,
                   quantity BIGINT NOT NULL,
                   avg_cost NUMERIC NOT NULL,
                   invested_amount NUMERIC NOT NULL,
                   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                   PRIMARY KEY (user_id, symbol)
               )"#,
        )
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS portfolio_values (
                   user_id TEXT PRIMARY KEY,
                   portfolio_value NUMERIC NOT NULL,
                   daily_change_percent NUMERIC NOT NULL,
                   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
               )"#,
        )
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS portfolio_transactions (
                   id UUID PRIMARY KEY,
                   user_id TEXT NOT NULL,
                   symbol TEXT NOT NULL,
                   side TEXT NOT NULL,
                   quantity BIGINT NOT NULL,
                   price NUMERIC NOT NULL,
                   total_value NUMERIC NOT NULL,
                   executed_at TIMESTAMPTZ NOT NULL,
                   profit_loss NUMERIC,
                   profit_loss_percent NUMERIC
               )"#,
        )
            .execute(&self.pool)
            .await?;

        tracing::info!("Persistence tables ready");
        Ok(())
    }

    async fn write(pool: &PgPool, record: &PersistenceRecord) -> Result<(), sqlx::Error> {
        match record {
            PersistenceRecord::Position { user_id, symbol, quantity, .. } if *quantity == 0 => {
                sqlx::query("DELETE FROM portfolio_positions WHERE user_id = $1 AND symbol = $2")
                    .bind(user_id)
                    .bind(symbol)
                    .execute(pool)
                    .await?;
            }
            PersistenceRecord::Position {
                user_id,
                symbol,
                quantity,
                avg_cost,
                invested_amount,
            } => {
                sqlx::query(
                    r#"INSERT INTO portfolio_positions (user_id, symbol, quantity, avg_cost,
                                                        invested_amount, updated_at)
                       VALUES ($1, $2, $3, $4, $5, NOW())
                       ON CONFLICT (user_id, symbol) DO UPDATE SET
                           quantity = $3,
                           avg_cost = $4,
                           invested_amount = $5,
                           updated_at = NOW()"#,
                )
                    .bind(user_id)
                    .bind(symbol)
                    .bind(quantity)
                    .bind(avg_cost)
                    .bind(invested_amount)
                    .execute(pool)
                    .await?;
            }
            PersistenceRecord::Portfolio {
                user_id,
                portfolio_value,
                daily_change_percent,
            } => {
                sqlx::query(
                    r#"INSERT INTO portfolio_values (user_id, portfolio_value,
                                                     daily_change_percent, updated_at)
                       VALUES ($1, $2, $3, NOW())
                       ON CONFLICT (user_id) DO UPDATE SET
                           portfolio_value = $2,
                           daily_change_percent = $3,
                           updated_at = NOW()"#,
                )
                    .bind(user_id)
                    .bind(portfolio_value)
                    .bind(daily_change_percent)
                    .execute(pool)
                    .await?;
            }
            PersistenceRecord::Transaction { user_id, transaction } => {
                sqlx::query(
                    r#"INSERT INTO portfolio_transactions (id, user_id, symbol, side, quantity,
                                                           price, total_value, executed_at,
                                                           profit_loss, profit_loss_percent)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                       ON CONFLICT (id) DO NOTHING"#,
                )
                    .bind(transaction.id)
                    .bind(user_id)
                    .bind(&transaction.symbol)
                    .bind(transaction.side.to_string())
                    .bind(transaction.quantity)
                    .bind(transaction.price)
                    .bind(transaction.total_value)
                    .bind(transaction.timestamp)
                    .bind(transaction.profit_loss)
                    .bind(transaction.profit_loss_percent)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }
}

impl PersistenceSink for PgPersistence {
    fn emit(&self, record: PersistenceRecord) {
        if let Err(mpsc::error::SendError(record)) = self.queue.send(record) {
            tracing::warn!(kind = record.kind(), "Persistence writer gone, dropping record");
        }
    }
}
