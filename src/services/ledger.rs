//! Ledger primitives: the small set of atomic account/position operations
//! every higher-level service (matching, settlement, the two AMMs) is
//! built out of. Each function takes an open transaction, fails before any
//! mutation when a precondition is violated, and returns the `Transaction`
//! record it wrote so the caller can batch them for a single insert or
//! inspect `balance_after` for logging.

use rust_decimal::Decimal;
use sqlx::Postgres;
use uuid::Uuid;

use crate::error::{EngineError, ServiceError};
use crate::models::{Account, ContractType, Position, Transaction, TransactionType};

pub type Tx<'c> = sqlx::Transaction<'c, Postgres>;

/// Locks and loads an account row for update within `tx`.
pub async fn lock_account(tx: &mut Tx<'_>, user_id: Uuid) -> Result<Account, ServiceError> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(account)
}

/// Locks the position row for `(user_id, market_id)`, creating it with all
/// zero fields on first touch.
pub async fn lock_position(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    market_id: Uuid,
) -> Result<Position, ServiceError> {
    let existing = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE user_id = $1 AND market_id = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(market_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(position) = existing {
        return Ok(position);
    }

    let position = Position::new(user_id, market_id);
    sqlx::query(
        "INSERT INTO positions (id, user_id, market_id, yes_quantity, no_quantity,
            reserved_yes_quantity, reserved_no_quantity, yes_avg_cost, no_avg_cost,
            realized_pnl, created_at, updated_at)
         VALUES ($1,$2,$3,0,0,0,0,0,0,0,$4,$4)",
    )
    .bind(position.id)
    .bind(position.user_id)
    .bind(position.market_id)
    .bind(position.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(position)
}

/// Reserves `amount` of an account's available balance. Emits `OrderReserve`.
pub async fn reserve_funds(
    tx: &mut Tx<'_>,
    account: &mut Account,
    amount: Decimal,
    order_id: Option<Uuid>,
    market_id: Option<Uuid>,
) -> Result<Transaction, ServiceError> {
    if account.available() < amount {
        return Err(EngineError::InsufficientFunds {
            required: amount,
            available: account.available(),
        }
        .into());
    }
    let balance_before = account.balance;
    account.reserved += amount;

    let txn = Transaction::record(
        account.id,
        TransactionType::OrderReserve,
        -amount,
        balance_before,
        order_id,
        None,
        market_id,
        "reserve funds for order",
    );
    write_account(tx, account).await?;
    insert_transaction(tx, &txn).await?;
    Ok(txn)
}

/// Releases `amount` out of `reserved` back into spendable balance. Emits
/// `OrderRelease`.
pub async fn release_funds(
    tx: &mut Tx<'_>,
    account: &mut Account,
    amount: Decimal,
    order_id: Option<Uuid>,
    market_id: Option<Uuid>,
) -> Result<Transaction, ServiceError> {
    let balance_before = account.balance;
    account.reserved -= amount;

    let txn = Transaction::record(
        account.id,
        TransactionType::OrderRelease,
        amount,
        balance_before,
        order_id,
        None,
        market_id,
        "release unused order reservation",
    );
    write_account(tx, account).await?;
    insert_transaction(tx, &txn).await?;
    Ok(txn)
}

/// Debits `amount` straight out of `balance` (not `reserved`) — used when a
/// cost is lower than what was reserved at order time, so the remainder is
/// first released via [`release_funds`] and the execution cost charged
/// here, or for AMM trades which never reserve up front.
#[allow(clippy::too_many_arguments)]
pub async fn charge(
    tx: &mut Tx<'_>,
    account: &mut Account,
    amount: Decimal,
    kind: TransactionType,
    order_id: Option<Uuid>,
    trade_id: Option<Uuid>,
    market_id: Option<Uuid>,
    description: &str,
) -> Result<Transaction, ServiceError> {
    if account.balance < amount {
        return Err(EngineError::InsufficientFunds {
            required: amount,
            available: account.balance,
        }
        .into());
    }
    let balance_before = account.balance;
    account.balance -= amount;

    let txn = Transaction::record(
        account.id,
        kind,
        -amount,
        balance_before,
        order_id,
        trade_id,
        market_id,
        description,
    );
    write_account(tx, account).await?;
    insert_transaction(tx, &txn).await?;
    Ok(txn)
}

#[allow(clippy::too_many_arguments)]
pub async fn credit(
    tx: &mut Tx<'_>,
    account: &mut Account,
    amount: Decimal,
    kind: TransactionType,
    order_id: Option<Uuid>,
    trade_id: Option<Uuid>,
    market_id: Option<Uuid>,
    description: &str,
) -> Result<Transaction, ServiceError> {
    let balance_before = account.balance;
    account.balance += amount;

    let txn = Transaction::record(
        account.id,
        kind,
        amount,
        balance_before,
        order_id,
        trade_id,
        market_id,
        description,
    );
    write_account(tx, account).await?;
    insert_transaction(tx, &txn).await?;
    Ok(txn)
}

/// Moves `qty` shares of `contract` from available to reserved.
pub fn reserve_shares(
    position: &mut Position,
    contract: ContractType,
    qty: Decimal,
) -> Result<(), EngineError> {
    let available = match contract {
        ContractType::Yes => position.available_yes(),
        ContractType::No => position.available_no(),
    };
    if available < qty {
        return Err(EngineError::InsufficientPosition {
            required: qty,
            available,
            contract_type: contract,
        });
    }
    match contract {
        ContractType::Yes => position.reserved_yes_quantity += qty,
        ContractType::No => position.reserved_no_quantity += qty,
    }
    Ok(())
}

/// Drains the reserved pool without touching the held quantity. Used both
/// to return shares to availability on cancellation and, at trade
/// execution, to clear the reservation for shares that `apply_sell_fill`
/// is about to remove from the holding — the quantity decrement happens
/// exactly once, in that latter call, not here.
pub fn release_shares(position: &mut Position, contract: ContractType, qty: Decimal) {
    match contract {
        ContractType::Yes => position.reserved_yes_quantity -= qty,
        ContractType::No => position.reserved_no_quantity -= qty,
    }
}

pub async fn write_account(tx: &mut Tx<'_>, account: &Account) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET balance = $1, reserved = $2, updated_at = $3 WHERE id = $4")
        .bind(account.balance)
        .bind(account.reserved)
        .bind(account.updated_at)
        .bind(account.id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn write_position(tx: &mut Tx<'_>, position: &Position) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE positions SET yes_quantity = $1, no_quantity = $2,
            reserved_yes_quantity = $3, reserved_no_quantity = $4,
            yes_avg_cost = $5, no_avg_cost = $6, realized_pnl = $7, updated_at = $8
         WHERE id = $9",
    )
    .bind(position.yes_quantity)
    .bind(position.no_quantity)
    .bind(position.reserved_yes_quantity)
    .bind(position.reserved_no_quantity)
    .bind(position.yes_avg_cost)
    .bind(position.no_avg_cost)
    .bind(position.realized_pnl)
    .bind(position.updated_at)
    .bind(position.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn insert_transaction(tx: &mut Tx<'_>, txn: &Transaction) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO transactions
            (id, user_id, transaction_type, amount_signed, balance_before, balance_after,
             order_id, trade_id, market_id, description, created_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
    )
    .bind(txn.id)
    .bind(txn.user_id)
    .bind(txn.transaction_type)
    .bind(txn.amount_signed)
    .bind(txn.balance_before)
    .bind(txn.balance_after)
    .bind(txn.order_id)
    .bind(txn.trade_id)
    .bind(txn.market_id)
    .bind(&txn.description)
    .bind(txn.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reserve_shares_fails_when_available_is_short() {
        let mut position = Position::new(Uuid::new_v4(), Uuid::new_v4());
        position.yes_quantity = dec!(5);
        let err = reserve_shares(&mut position, ContractType::Yes, dec!(10)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientPosition { .. }));
    }

    #[test]
    fn release_shares_drains_only_the_reserved_pool() {
        let mut position = Position::new(Uuid::new_v4(), Uuid::new_v4());
        position.yes_quantity = dec!(10);
        reserve_shares(&mut position, ContractType::Yes, dec!(4)).unwrap();
        release_shares(&mut position, ContractType::Yes, dec!(4));
        assert_eq!(position.yes_quantity, dec!(10));
        assert_eq!(position.reserved_yes_quantity, dec!(0));
    }
}
