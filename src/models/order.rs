#![allow(dead_code)]
//! Order row and the enums describing its shape. Mirrors
//! `models/order.rs` field-by-field where the domain carries over (id,
//! market, user, side, price, quantity, status, timestamps) and replaces
//! perpetuals-only fields (leverage) with the outcome-market axis
//! (`contract_type`).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "contract_type", rename_all = "lowercase")]
pub enum ContractType {
    Yes,
    No,
}

impl ContractType {
    pub fn opposite(self) -> ContractType {
        match self {
            ContractType::Yes => ContractType::No,
            ContractType::No => ContractType::Yes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    MintSet,
    RedeemSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    pub fn is_resting(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub market_id: Uuid,
    pub user_id: Uuid,
    pub side: OrderSide,
    pub contract_type: ContractType,
    pub order_type: OrderType,
    /// Decimal price in 0.01..=0.99 for Limit/Market; exactly 1.00 for
    /// MintSet/RedeemSet.
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn price_cents(&self) -> i32 {
        (self.price * Decimal::from(100))
            .round()
            .to_string()
            .parse()
            .unwrap_or(0)
    }
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateOrderRequest {
    pub market_id: Uuid,
    pub side: OrderSide,
    pub contract_type: ContractType,
    pub order_type: OrderType,
    #[validate(range(min = 0.01, max = 0.99))]
    pub price: Option<Decimal>,
    #[validate(range(min = 1))]
    pub quantity: Decimal,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub market_id: Uuid,
    pub side: OrderSide,
    pub contract_type: ContractType,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        let remaining = o.remaining();
        Self {
            id: o.id,
            market_id: o.market_id,
            side: o.side,
            contract_type: o.contract_type,
            order_type: o.order_type,
            price: o.price,
            quantity: o.quantity,
            filled_quantity: o.filled_quantity,
            remaining,
            status: o.status,
            created_at: o.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn opposite_contract_type_round_trips() {
        assert_eq!(ContractType::Yes.opposite(), ContractType::No);
        assert_eq!(ContractType::No.opposite().opposite(), ContractType::No);
    }

    #[test]
    fn remaining_is_quantity_minus_filled() {
        let o = Order {
            id: Uuid::new_v4(),
            market_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            side: OrderSide::Buy,
            contract_type: ContractType::Yes,
            order_type: OrderType::Limit,
            price: dec!(0.55),
            quantity: dec!(10),
            filled_quantity: dec!(4),
            status: OrderStatus::PartiallyFilled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(o.remaining(), dec!(6));
        assert_eq!(o.price_cents(), 55);
    }
}
