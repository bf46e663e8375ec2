//! Valuation Module
//! Periodic revaluation, ranking, and portfolio summaries

pub mod ranking;
pub mod scheduler;
pub mod summary;

pub use ranking::{RankingEntry, RankingPublisher, RankingTable};
pub use scheduler::{
    daily_change_percent, RevaluationOutcome, RevaluationScheduler, SchedulerConfig, Valuation,
};
pub use summary::{HoldingSummary, PortfolioSummary};
