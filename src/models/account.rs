#![allow(dead_code)]
//! Account ledger row.
//!
//! `available = balance - reserved` is never stored; it is always derived,
//! the same way `available` is derived from `balance`/`frozen` in
//! `models/balance.rs`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub balance: Decimal,
    pub reserved: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn available(&self) -> Decimal {
        self.balance - self.reserved
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub username: String,
    pub balance: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        let available = a.available();
        Self {
            id: a.id,
            username: a.username,
            balance: a.balance,
            reserved: a.reserved,
            available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn available_is_balance_minus_reserved() {
        let a = Account {
            id: Uuid::new_v4(),
            username: "alice".into(),
            balance: dec!(100.00),
            reserved: dec!(30.00),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(a.available(), dec!(70.00));
    }
}
