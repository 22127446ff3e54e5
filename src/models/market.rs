#![allow(dead_code)]
//! Category / Event / Market — the taxonomy a prediction market lives under.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Active,
    Closed,
    Settled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "market_status", rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    Halted,
    SettledYes,
    SettledNo,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub category_id: Uuid,
    pub title: String,
    pub status: EventStatus,
    pub trading_starts: DateTime<Utc>,
    pub trading_ends: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_trading_window_open(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Active && now >= self.trading_starts && now <= self.trading_ends
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Market {
    pub id: Uuid,
    pub event_id: Uuid,
    pub question: String,
    pub status: MarketStatus,
    pub winning_outcome: Option<String>, // "yes" | "no", set on settlement
    pub last_yes_price: i32,             // cents 1..99
    pub last_no_price: i32,              // cents 1..99, last_yes + last_no == 100
    pub best_yes_bid: Option<i32>,
    pub best_yes_ask: Option<i32>,
    pub best_no_bid: Option<i32>,
    pub best_no_ask: Option<i32>,
    pub total_volume: Decimal,
    pub total_shares_outstanding: Decimal,
    pub fees_collected: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    /// A market is trading active only while both its own status and its
    /// parent event's status/window agree.
    pub fn is_trading_active(&self, event: &Event, now: DateTime<Utc>) -> bool {
        self.status == MarketStatus::Active && event.is_trading_window_open(now)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, MarketStatus::SettledYes | MarketStatus::SettledNo)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarketResponse {
    pub id: Uuid,
    pub question: String,
    pub status: MarketStatus,
    pub last_yes_price: i32,
    pub last_no_price: i32,
    pub total_volume: Decimal,
}

impl From<Market> for MarketResponse {
    fn from(m: Market) -> Self {
        Self {
            id: m.id,
            question: m.question,
            status: m.status,
            last_yes_price: m.last_yes_price,
            last_no_price: m.last_no_price,
            total_volume: m.total_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_event(status: EventStatus) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            title: "t".into(),
            status,
            trading_starts: now - Duration::hours(1),
            trading_ends: now + Duration::hours(1),
            created_at: now,
        }
    }

    #[test]
    fn trading_window_requires_active_event() {
        let event = make_event(EventStatus::Active);
        assert!(event.is_trading_window_open(Utc::now()));
        let closed = make_event(EventStatus::Closed);
        assert!(!closed.is_trading_window_open(Utc::now()));
    }
}
