//! Shared types for the order book matching engine: the in-memory resting
//! order used by the depth cache, the outcome of a single `place_order`
//! call, and the aggregated snapshot served to `get_orderbook`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{ContractType, Order, OrderSide, Trade};

/// A resting order as tracked by the in-memory depth cache
/// ([`super::orderbook::Orderbook`]). This is a read-optimized projection,
/// not the source of truth — matching decisions are made transactionally
/// against the database; this cache exists so `get_orderbook` can be
/// served without touching Postgres on every request.
#[derive(Debug, Clone)]
pub struct RestingOrder {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub price_cents: i32,
    pub remaining: Decimal,
    pub created_at: DateTime<Utc>,
    /// Monotonic insertion sequence, the tiebreaker below `created_at`
    /// resolution for strict price-time priority.
    pub sequence: u64,
}

/// One `{price_cents, quantity}` level in an aggregated depth view.
#[derive(Debug, Clone, Serialize)]
pub struct DepthLevel {
    pub price_cents: i32,
    pub quantity: Decimal,
}

/// `get_orderbook` response shape: four independently aggregated sides.
#[derive(Debug, Clone, Serialize)]
pub struct OrderbookSnapshot {
    pub market_id: Uuid,
    pub yes_bids: Vec<DepthLevel>,
    pub yes_asks: Vec<DepthLevel>,
    pub no_bids: Vec<DepthLevel>,
    pub no_asks: Vec<DepthLevel>,
}

/// What kind of match produced a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Direct,
    Mint,
    Merge,
}

/// One resolved fill, already reflected in the database by the time it is
/// returned — carries enough detail for the caller to build a `Trade`
/// projection or log a metric without a second query.
#[derive(Debug, Clone)]
pub struct Fill {
    pub kind: MatchKind,
    pub contract_type: ContractType,
    pub counterparty_contract_type: ContractType,
    pub incoming_order_id: Uuid,
    pub resting_order_id: Uuid,
    pub incoming_user_id: Uuid,
    pub resting_user_id: Uuid,
    pub incoming_fill_price_cents: i32,
    pub resting_fill_price_cents: i32,
    pub quantity: Decimal,
}

/// Result of `place_order`: the (possibly partially filled) order plus
/// every fill it produced, in execution order.
#[derive(Debug, Clone)]
pub struct PlaceOrderResult {
    pub order: Order,
    pub trades: Vec<Trade>,
}

/// A candidate resting order pulled from the database for a matching
/// attempt — same shape as `RestingOrder` plus the side it belongs to,
/// since a single SQL query may span both sides of a contract's book.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MatchCandidate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub side: OrderSide,
    pub contract_type: ContractType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

impl MatchCandidate {
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
