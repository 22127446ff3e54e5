#![allow(dead_code)]
//! Append-only ledger entry. Every balance mutation in
//! the system emits exactly one of these, with `balance_before`/
//! `balance_after` bracketing the delta.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    TradeBuy,
    TradeSell,
    SettlementWin,
    SettlementLoss,
    OrderReserve,
    OrderRelease,
    Refund,
    Mint,
    Redeem,
    MintMatch,
    MergeMatch,
    TransactionFee,
    EventReward,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount_signed: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub order_id: Option<Uuid>,
    pub trade_id: Option<Uuid>,
    pub market_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds a record whose `balance_after = balance_before + amount_signed`
    /// always holds by construction — an exact bracket of the delta,
    /// rather than an after-the-fact reconstruction.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        user_id: Uuid,
        transaction_type: TransactionType,
        amount_signed: Decimal,
        balance_before: Decimal,
        order_id: Option<Uuid>,
        trade_id: Option<Uuid>,
        market_id: Option<Uuid>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            transaction_type,
            amount_signed,
            balance_before,
            balance_after: balance_before + amount_signed,
            order_id,
            trade_id,
            market_id,
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn record_brackets_the_delta_exactly() {
        let t = Transaction::record(
            Uuid::new_v4(),
            TransactionType::TradeBuy,
            dec!(-12.34),
            dec!(100.00),
            None,
            None,
            None,
            "buy 5 YES @ 60c",
        );
        assert_eq!(t.balance_after, dec!(87.66));
        assert_eq!(t.balance_after - t.balance_before, t.amount_signed);
    }
}
