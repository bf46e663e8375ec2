//! Revaluation Scheduler
//!
//! Periodically re-prices every held position, recomputes the portfolio value
//! and its change versus the previous valuation, and publishes a ranking entry.
//!
//! - One run in flight at a time; a trigger that finds a run in progress is
//!   dropped, not queued.
//! - Symbols whose price cannot be obtained are skipped for the cycle.
//! - If no held symbol can be priced the previous valuation stands.
//! - `stop()` cancels the timer and any in-flight run; the busy flag is
//!   released by the run's guard even when it is aborted.

use crate::engine::TradeEngine;
use crate::market::PriceCache;
use crate::observability::metrics::metrics;
use crate::persistence::{PersistenceRecord, PersistenceSink};
use crate::valuation::ranking::{RankingEntry, RankingPublisher};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between revaluation cycles (default: 5 min)
    pub period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Valuation {
    pub user_id: String,
    pub cash_balance: Decimal,
    pub holdings_value: Decimal,
    pub portfolio_value: Decimal,
    pub previous_value: Decimal,
    pub daily_change_percent: Decimal,
    pub skipped_symbols: Vec<String>,
    pub valued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevaluationOutcome {
    /// New valuation computed and published
    Completed(Valuation),
    /// Nothing could be priced; previous valuation kept
    Stale { skipped_symbols: Vec<String> },
    /// Another run was in flight
    Skipped,
}

impl RevaluationOutcome {
    fn label(&self) -> &'static str {
        match self {
            RevaluationOutcome::Completed(_) => "completed",
            RevaluationOutcome::Stale { .. } => "stale",
            RevaluationOutcome::Skipped => "skipped",
        }
    }
}

/// `(new - previous) / previous * 100`, or 0 when there is no positive base
pub fn daily_change_percent(previous: Decimal, current: Decimal) -> Decimal {
    if previous <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (current - previous) / previous * Decimal::ONE_HUNDRED
}

/// Clears the busy flag when the run ends, including on abort
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Revaluator {
    engine: Arc<TradeEngine>,
    prices: PriceCache,
    publisher: Arc<dyn RankingPublisher>,
    persistence: Arc<dyn PersistenceSink>,
    display_name: String,
    busy: AtomicBool,
    previous_value: Mutex<Decimal>,
    last_valuation: Mutex<Option<Valuation>>,
}

impl Revaluator {
    #[instrument(skip(self), fields(user = %self.engine.user_id()))]
    async fn run_once(&self) -> RevaluationOutcome {
        let outcome = match BusyGuard::acquire(&self.busy) {
            Some(_guard) => self.revalue().await,
            None => {
                debug!("Revaluation already in progress, skipping");
                RevaluationOutcome::Skipped
            }
        };

        if let Some(m) = metrics() {
            m.revaluation_runs_total
                .with_label_values(&[outcome.label()])
                .inc();
        }
        outcome
    }

    async fn revalue(&self) -> RevaluationOutcome {
        let user_id = self.engine.user_id().to_string();
        // Cash and positions from one instant; trades landing mid-cycle are
        // picked up by the next run
        let snapshot = self.engine.snapshot().await;

        let lookups = snapshot.positions.iter().map(|p| {
            let symbol = p.symbol.clone();
            async move {
                let result = self.prices.get(&symbol).await;
                (symbol, result)
            }
        });

        let mut prices: HashMap<String, Decimal> = HashMap::new();
        let mut skipped_symbols = Vec::new();
        for (symbol, result) in join_all(lookups).await {
            match result {
                Ok(price) => {
                    prices.insert(symbol, price);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Skipping symbol for this cycle");
                    skipped_symbols.push(symbol);
                }
            }
        }

        if !snapshot.positions.is_empty() && prices.is_empty() {
            warn!(
                skipped = skipped_symbols.len(),
                "No prices available, keeping previous valuation"
            );
            return RevaluationOutcome::Stale { skipped_symbols };
        }

        let cash_balance = snapshot.cash_balance;
        let holdings_value: Decimal = snapshot
            .positions
            .iter()
            .filter_map(|p| prices.get(&p.symbol).map(|price| p.market_value(*price)))
            .sum();
        let portfolio_value = cash_balance + holdings_value;

        let previous_value = {
            let mut previous = lock(&self.previous_value);
            std::mem::replace(&mut *previous, portfolio_value)
        };
        let change = daily_change_percent(previous_value, portfolio_value);

        let valuation = Valuation {
            user_id: user_id.clone(),
            cash_balance,
            holdings_value,
            portfolio_value,
            previous_value,
            daily_change_percent: change,
            skipped_symbols,
            valued_at: Utc::now(),
        };
        *lock(&self.last_valuation) = Some(valuation.clone());

        self.publisher
            .publish(RankingEntry::new(
                user_id.clone(),
                self.display_name.clone(),
                portfolio_value,
                change,
            ))
            .await;

        // Current rows, not the snapshot: a position closed mid-cycle stays closed
        let open_positions = self.engine.persist_positions().await;
        self.persistence
            .emit(PersistenceRecord::portfolio(&user_id, portfolio_value, change));

        if let Some(m) = metrics() {
            m.set_portfolio_value(&user_id, portfolio_value);
            m.active_positions
                .with_label_values(&[user_id.as_str()])
                .set(open_positions as f64);
        }

        info!(
            value = %portfolio_value,
            previous = %previous_value,
            change_pct = %change.round_dp(2),
            skipped = valuation.skipped_symbols.len(),
            "Portfolio revalued"
        );

        RevaluationOutcome::Completed(valuation)
    }
}

pub struct RevaluationScheduler {
    revaluator: Arc<Revaluator>,
    config: SchedulerConfig,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RevaluationScheduler {
    /// `initial_value` is the base for the first cycle's change (normally the
    /// starting cash balance)
    pub fn new(
        engine: Arc<TradeEngine>,
        prices: PriceCache,
        publisher: Arc<dyn RankingPublisher>,
        persistence: Arc<dyn PersistenceSink>,
        display_name: impl Into<String>,
        initial_value: Decimal,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            revaluator: Arc::new(Revaluator {
                engine,
                prices,
                publisher,
                persistence,
                display_name: display_name.into(),
                busy: AtomicBool::new(false),
                previous_value: Mutex::new(initial_value),
                last_valuation: Mutex::new(None),
            }),
            config,
            timer: Mutex::new(None),
        }
    }

    /// Publish the starting entry (current base value, 0% change)
    pub async fn announce(&self) {
        let r = &self.revaluator;
        let value = *lock(&r.previous_value);
        r.publisher
            .publish(RankingEntry::new(
                r.engine.user_id(),
                r.display_name.clone(),
                value,
                Decimal::ZERO,
            ))
            .await;
        r.persistence
            .emit(PersistenceRecord::portfolio(r.engine.user_id(), value, Decimal::ZERO));
    }

    /// Run one cycle now. Returns `Skipped` if a cycle is already running.
    pub async fn run_once(&self) -> RevaluationOutcome {
        self.revaluator.run_once().await
    }

    /// Start the periodic timer. Returns false if it was already running or
    /// the configured period is zero.
    pub fn start(&self) -> bool {
        if self.config.period.is_zero() {
            error!(
                user = %self.revaluator.engine.user_id(),
                "Revaluation period must be positive, scheduler not started"
            );
            return false;
        }

        let mut timer = lock(&self.timer);
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let revaluator = self.revaluator.clone();
        let period = self.config.period;

        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Dropping the set on cancellation aborts any in-flight run
            let mut runs = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let revaluator = revaluator.clone();
                        runs.spawn(async move { revaluator.run_once().await });
                    }
                    Some(joined) = runs.join_next(), if !runs.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                error!(error = %e, "Revaluation run panicked");
                            }
                        }
                    }
                }
            }
        }));

        info!(
            user = %self.revaluator.engine.user_id(),
            period_secs = period.as_secs(),
            "Revaluation scheduler started"
        );
        true
    }

    /// Cancel the timer and any in-flight run. Idempotent.
    pub fn stop(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
            info!(user = %self.revaluator.engine.user_id(), "Revaluation scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Whether a cycle is currently in flight
    pub fn is_busy(&self) -> bool {
        self.revaluator.busy.load(Ordering::Acquire)
    }

    pub fn last_valuation(&self) -> Option<Valuation> {
        lock(&self.revaluator.last_valuation).clone()
    }
}

impl Drop for RevaluationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
