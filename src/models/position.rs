#![allow(dead_code)]
//! Per (user, market) share holdings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub yes_quantity: Decimal,
    pub no_quantity: Decimal,
    pub reserved_yes_quantity: Decimal,
    pub reserved_no_quantity: Decimal,
    pub yes_avg_cost: Decimal, // cents, two decimals
    pub no_avg_cost: Decimal,
    pub realized_pnl: Decimal, // dollars
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(user_id: Uuid, market_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            market_id,
            yes_quantity: Decimal::ZERO,
            no_quantity: Decimal::ZERO,
            reserved_yes_quantity: Decimal::ZERO,
            reserved_no_quantity: Decimal::ZERO,
            yes_avg_cost: Decimal::ZERO,
            no_avg_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available_yes(&self) -> Decimal {
        self.yes_quantity - self.reserved_yes_quantity
    }

    pub fn available_no(&self) -> Decimal {
        self.no_quantity - self.reserved_no_quantity
    }

    /// Applies the weighted-average-cost update used by every buy fill,
    /// whether from a direct match or a mint match — mint-match fills use
    /// this formula too, not a fixed 50c basis.
    pub fn apply_buy_fill(&mut self, contract: super::ContractType, fill_qty: Decimal, price_cents: Decimal) {
        match contract {
            super::ContractType::Yes => {
                let old_cost = self.yes_avg_cost * self.yes_quantity;
                let new_qty = self.yes_quantity + fill_qty;
                let new_cost = old_cost + price_cents * fill_qty;
                self.yes_avg_cost = if new_qty.is_zero() { Decimal::ZERO } else { new_cost / new_qty };
                self.yes_quantity = new_qty;
            }
            super::ContractType::No => {
                let old_cost = self.no_avg_cost * self.no_quantity;
                let new_qty = self.no_quantity + fill_qty;
                let new_cost = old_cost + price_cents * fill_qty;
                self.no_avg_cost = if new_qty.is_zero() { Decimal::ZERO } else { new_cost / new_qty };
                self.no_quantity = new_qty;
            }
        }
    }

    /// Realizes P&L against the seller's own avg_cost and decrements the
    /// held quantity (the position-update-on-fill rule).
    pub fn apply_sell_fill(&mut self, contract: super::ContractType, fill_qty: Decimal, price_cents: Decimal) {
        match contract {
            super::ContractType::Yes => {
                self.realized_pnl += fill_qty * (price_cents - self.yes_avg_cost) / Decimal::from(100);
                self.yes_quantity -= fill_qty;
                if self.yes_quantity.is_zero() {
                    self.yes_avg_cost = Decimal::ZERO;
                }
            }
            super::ContractType::No => {
                self.realized_pnl += fill_qty * (price_cents - self.no_avg_cost) / Decimal::from(100);
                self.no_quantity -= fill_qty;
                if self.no_quantity.is_zero() {
                    self.no_avg_cost = Decimal::ZERO;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContractType;
    use rust_decimal_macros::dec;

    #[test]
    fn weighted_avg_cost_updates_on_successive_buys() {
        let mut p = Position::new(Uuid::new_v4(), Uuid::new_v4());
        p.apply_buy_fill(ContractType::Yes, dec!(10), dec!(40));
        assert_eq!(p.yes_quantity, dec!(10));
        assert_eq!(p.yes_avg_cost, dec!(40));

        p.apply_buy_fill(ContractType::Yes, dec!(10), dec!(60));
        assert_eq!(p.yes_quantity, dec!(20));
        assert_eq!(p.yes_avg_cost, dec!(50));
    }

    #[test]
    fn sell_fill_realizes_pnl_against_own_avg_cost() {
        let mut p = Position::new(Uuid::new_v4(), Uuid::new_v4());
        p.apply_buy_fill(ContractType::Yes, dec!(10), dec!(40));
        p.apply_sell_fill(ContractType::Yes, dec!(5), dec!(45));
        assert_eq!(p.realized_pnl, dec!(0.25));
        assert_eq!(p.yes_quantity, dec!(5));
    }

    #[test]
    fn avg_cost_resets_to_zero_when_quantity_drained() {
        let mut p = Position::new(Uuid::new_v4(), Uuid::new_v4());
        p.apply_buy_fill(ContractType::No, dec!(3), dec!(40));
        p.apply_sell_fill(ContractType::No, dec!(3), dec!(40));
        assert_eq!(p.no_quantity, dec!(0));
        assert_eq!(p.no_avg_cost, dec!(0));
    }
}
