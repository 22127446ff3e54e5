#![allow(dead_code)]
//! Shared AMM pool row — used by both the LMSR engine (`liquidity_b` as the
//! scoring-rule parameter) and the Bookmaker engine (`liquidity_b` unused,
//! `pool_balance` as collected collateral).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AmmPool {
    pub id: Uuid,
    pub market_id: Uuid,
    pub liquidity_b: Decimal,
    pub yes_shares: Decimal,
    pub no_shares: Decimal,
    pub pool_balance: Decimal,
    pub fee_percentage: Decimal,
    pub total_fees_collected: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AmmPool {
    pub fn new(market_id: Uuid, liquidity_b: Decimal, fee_percentage: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            market_id,
            liquidity_b,
            yes_shares: Decimal::ZERO,
            no_shares: Decimal::ZERO,
            pool_balance: Decimal::ZERO,
            fee_percentage,
            total_fees_collected: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "amm_side", rename_all = "lowercase")]
pub enum AmmSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AmmTrade {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub market_id: Uuid,
    pub user_id: Uuid,
    pub side: AmmSide,
    pub contract_type: super::ContractType,
    pub quantity: Decimal,
    pub price_before_cents: i32,
    pub price_after_cents: i32,
    pub avg_price_cents: Decimal,
    pub total_cost: Decimal,
    pub fee_amount: Decimal,
    pub created_at: DateTime<Utc>,
}
