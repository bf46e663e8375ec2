//! Position Ledger with Weighted Average Cost Basis
//! In-memory map of symbol -> position. Long-only, whole shares.

use crate::engine::error::{normalize_symbol, TradeError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
    /// Always `avg_cost * quantity`
    pub invested_amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Market value of the position at `price`
    pub fn market_value(&self, price: Decimal) -> Decimal {
        Decimal::from(self.quantity) * price
    }
}

/// Result of a successful sell against the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct SellOutcome {
    /// Average cost of the position before the sell was applied
    pub avg_cost_at_sale: Decimal,
    /// Remaining position, `None` when the sell closed it
    pub remaining: Option<Position>,
}

#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: HashMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a buy fill, blending the cost basis when the symbol is already held
    pub fn apply_buy(
        &mut self,
        symbol: &str,
        quantity: i64,
        unit_price: Decimal,
    ) -> Result<Position, TradeError> {
        let symbol = normalize_symbol(symbol)?;
        validate_fill(quantity, unit_price)?;

        let fill_cost = Decimal::from(quantity)
            .checked_mul(unit_price)
            .ok_or_else(|| TradeError::InvalidOrder("order value overflow".into()))?;

        let (new_quantity, total_cost) = match self.positions.get(&symbol) {
            Some(pos) => {
                let new_quantity = pos
                    .quantity
                    .checked_add(quantity)
                    .ok_or_else(|| TradeError::InvalidOrder("quantity overflow".into()))?;
                let total_cost = pos
                    .invested_amount
                    .checked_add(fill_cost)
                    .ok_or_else(|| TradeError::InvalidOrder("order value overflow".into()))?;
                (new_quantity, total_cost)
            }
            None => (quantity, fill_cost),
        };

        // newAvg = (oldInvested + q * p) / (oldQty + q)
        let avg_cost = total_cost / Decimal::from(new_quantity);
        let position = Position {
            symbol: symbol.clone(),
            quantity: new_quantity,
            avg_cost,
            invested_amount: avg_cost * Decimal::from(new_quantity),
            updated_at: Utc::now(),
        };

        self.positions.insert(symbol, position.clone());
        Ok(position)
    }

    /// Apply a sell fill. The remaining shares keep their average cost.
    pub fn apply_sell(&mut self, symbol: &str, quantity: i64) -> Result<SellOutcome, TradeError> {
        let symbol = normalize_symbol(symbol)?;
        if quantity <= 0 {
            return Err(TradeError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }

        let held = self.held_quantity(&symbol);
        if quantity > held {
            return Err(TradeError::InsufficientShares {
                symbol,
                requested: quantity,
                held,
            });
        }

        let new_quantity = held - quantity;
        if new_quantity == 0 {
            let closed = self.positions.remove(&symbol);
            return Ok(SellOutcome {
                avg_cost_at_sale: closed.map(|p| p.avg_cost).unwrap_or_default(),
                remaining: None,
            });
        }

        let pos = self
            .positions
            .get_mut(&symbol)
            .ok_or_else(|| TradeError::InsufficientShares {
                symbol: symbol.clone(),
                requested: quantity,
                held: 0,
            })?;

        let avg_cost_at_sale = pos.avg_cost;
        pos.quantity = new_quantity;
        pos.invested_amount = pos.avg_cost * Decimal::from(new_quantity);
        pos.updated_at = Utc::now();

        Ok(SellOutcome {
            avg_cost_at_sale,
            remaining: Some(pos.clone()),
        })
    }

    /// Sum of `quantity * price` over all positions. Positions without a price
    /// contribute nothing but stay in the ledger.
    pub fn current_value<F>(&self, mut price_lookup: F) -> Decimal
    where
        F: FnMut(&str) -> Option<Decimal>,
    {
        self.positions
            .values()
            .filter_map(|pos| price_lookup(&pos.symbol).map(|price| pos.market_value(price)))
            .sum()
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(&symbol.trim().to_ascii_uppercase())
    }

    pub fn held_quantity(&self, symbol: &str) -> i64 {
        self.get(symbol).map(|p| p.quantity).unwrap_or(0)
    }

    /// All positions ordered by symbol
    pub fn snapshot(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn total_invested(&self) -> Decimal {
        self.positions.values().map(|p| p.invested_amount).sum()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

fn validate_fill(quantity: i64, unit_price: Decimal) -> Result<(), TradeError> {
    if quantity <= 0 {
        return Err(TradeError::InvalidOrder(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    if unit_price <= Decimal::ZERO {
        return Err(TradeError::InvalidOrder(format!(
            "price must be positive, got {}",
            unit_price
        )));
    }
    Ok(())
}
