#![allow(dead_code)]
//! Immutable Trade record. For Mint/Merge, `buy_order`/`sell_order`
//! and `buyer`/`seller` are reused to hold the two complementary
//! participants rather than a strict buy/sell pair (see the open
//! questions: retained verbatim from the source).
//!
//! `price_cents` is the trade's single execution price: for Direct, the
//! maker's (resting order's) price; for Mint/Merge, the incoming order's
//! (`buy_order` slot) own price. The counterparty's own price, which may
//! differ in Mint/Merge, is already persisted on their Order row and is
//! not duplicated here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::ContractType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "trade_type", rename_all = "lowercase")]
pub enum TradeType {
    Direct,
    Mint,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub market_id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub contract_type: ContractType,
    pub price_cents: i32,
    pub quantity: Decimal,
    pub trade_type: TradeType,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TradeResponse {
    pub id: Uuid,
    pub market_id: Uuid,
    pub contract_type: ContractType,
    pub price_cents: i32,
    pub quantity: Decimal,
    pub trade_type: TradeType,
    pub executed_at: DateTime<Utc>,
}

impl From<Trade> for TradeResponse {
    fn from(t: Trade) -> Self {
        Self {
            id: t.id,
            market_id: t.market_id,
            contract_type: t.contract_type,
            price_cents: t.price_cents,
            quantity: t.quantity,
            trade_type: t.trade_type,
            executed_at: t.executed_at,
        }
    }
}
