//! Portfolio summary: per-holding market value and unrealized P/L

use crate::engine::AccountSnapshot;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingSummary {
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub invested_amount: Decimal,
    /// `None` when no price could be obtained
    pub current_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub unrealized_pnl_percent: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub user_id: String,
    pub cash_balance: Decimal,
    pub total_invested: Decimal,
    /// Market value of priced holdings only
    pub holdings_value: Decimal,
    pub portfolio_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: Decimal,
    pub realized_pnl: Decimal,
    pub holdings: Vec<HoldingSummary>,
}

impl PortfolioSummary {
    pub fn build(snapshot: &AccountSnapshot, prices: &HashMap<String, Decimal>) -> Self {
        let holdings: Vec<HoldingSummary> = snapshot
            .positions
            .iter()
            .map(|pos| {
                let current_price = prices.get(&pos.symbol).copied();
                let market_value = current_price.map(|p| pos.market_value(p));
                let unrealized_pnl = market_value.map(|v| v - pos.invested_amount);
                HoldingSummary {
                    symbol: pos.symbol.clone(),
                    quantity: pos.quantity,
                    avg_cost: pos.avg_cost,
                    invested_amount: pos.invested_amount,
                    current_price,
                    market_value,
                    unrealized_pnl,
                    unrealized_pnl_percent: unrealized_pnl
                        .map(|pnl| percent_of(pnl, pos.invested_amount)),
                }
            })
            .collect();

        let total_invested: Decimal = holdings.iter().map(|h| h.invested_amount).sum();
        let holdings_value: Decimal = holdings.iter().filter_map(|h| h.market_value).sum();
        // Only holdings with a price contribute to unrealized P/L
        let priced_invested: Decimal = holdings
            .iter()
            .filter(|h| h.market_value.is_some())
            .map(|h| h.invested_amount)
            .sum();
        let unrealized_pnl = holdings_value - priced_invested;

        Self {
            user_id: snapshot.user_id.clone(),
            cash_balance: snapshot.cash_balance,
            total_invested,
            holdings_value,
            portfolio_value: snapshot.cash_balance + holdings_value,
            unrealized_pnl,
            unrealized_pnl_percent: percent_of(unrealized_pnl, priced_invested),
            realized_pnl: snapshot.realized_pnl,
            holdings,
        }
    }
}

fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole > Decimal::ZERO {
        part / whole * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}
