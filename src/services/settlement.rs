//! Settlement and complete-set operations: resolving a market into
//! winner payouts, and the two inverse operations that mint or redeem a
//! YES+NO pair for a flat $1.00 (minus/plus fee).

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{EngineError, ServiceError};
use crate::models::{ContractType, MarketStatus, Order, OrderSide, OrderStatus, TransactionType};
use crate::services::ledger;

pub struct SettlementService {
    pub db: Database,
    pub fee_rate: Decimal,
}

/// Per-market totals returned after `settle_market`, used by callers that
/// want to log or expose settlement statistics without a second query.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementStats {
    pub market_id: Uuid,
    pub winning_outcome: ContractType,
    pub positions_settled: usize,
    pub orders_cancelled: usize,
    pub total_paid_out: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct MintStats {
    pub market_id: Uuid,
    pub quantity: Decimal,
    pub cost: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedeemStats {
    pub market_id: Uuid,
    pub quantity: Decimal,
    pub payout: Decimal,
}

impl SettlementService {
    pub fn new(db: Database, fee_rate: Decimal) -> Self {
        Self { db, fee_rate }
    }

    /// Cancels every resting order, pays every non-zero position the
    /// winning side's shares at $1.00 each (with a zero-amount loss
    /// record for the audit trail on the losing side), and marks the
    /// market settled. Runs as one serializable transaction.
    pub async fn settle_market(
        &self,
        market_id: Uuid,
        outcome: ContractType,
    ) -> Result<SettlementStats, ServiceError> {
        let max_attempts = 5u32;
        let base_delay = std::time::Duration::from_millis(10);

        crate::db::tx::with_serializable_retry(
            &self.db.pool,
            max_attempts,
            base_delay,
            |tx| {
                Box::pin(async move {
                    let market = sqlx::query_as::<_, crate::models::Market>(
                        "SELECT * FROM markets WHERE id = $1 FOR UPDATE",
                    )
                    .bind(market_id)
                    .fetch_one(&mut **tx)
                    .await?;

                    if !matches!(market.status, MarketStatus::Active | MarketStatus::Halted) {
                        return Err(ServiceError::Domain(EngineError::MarketNotSettleable {
                            market_id,
                            status: format!("{:?}", market.status),
                        }));
                    }

                    let resting: Vec<Order> = sqlx::query_as::<_, Order>(
                        "SELECT * FROM orders WHERE market_id = $1 AND status IN ('open','partially_filled')
                         ORDER BY id FOR UPDATE",
                    )
                    .bind(market_id)
                    .fetch_all(&mut **tx)
                    .await?;

                    let mut orders_cancelled = 0usize;
                    for mut order in resting {
                        let remaining = order.remaining();
                        let mut account = ledger::lock_account(tx, order.user_id).await?;
                        match order.side {
                            OrderSide::Buy => {
                                let refund = order.price * remaining;
                                ledger::release_funds(tx, &mut account, refund, Some(order.id), Some(market_id))
                                    .await?;
                            }
                            OrderSide::Sell => {
                                let mut position =
                                    ledger::lock_position(tx, order.user_id, market_id).await?;
                                ledger::release_shares(&mut position, order.contract_type, remaining);
                                ledger::write_position(tx, &position).await?;
                            }
                        }
                        order.status = OrderStatus::Cancelled;
                        order.updated_at = chrono::Utc::now();
                        sqlx::query(
                            "UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3",
                        )
                        .bind(order.status)
                        .bind(order.updated_at)
                        .bind(order.id)
                        .execute(&mut **tx)
                        .await?;
                        orders_cancelled += 1;
                    }

                    let positions: Vec<crate::models::Position> = sqlx::query_as(
                        "SELECT * FROM positions WHERE market_id = $1
                         AND (yes_quantity <> 0 OR no_quantity <> 0) ORDER BY id FOR UPDATE",
                    )
                    .bind(market_id)
                    .fetch_all(&mut **tx)
                    .await?;

                    let mut total_paid_out = Decimal::ZERO;
                    let mut positions_settled = 0usize;
                    for mut position in positions {
                        let mut account = ledger::lock_account(tx, position.user_id).await?;
                        let (winning_qty, losing_qty) = match outcome {
                            ContractType::Yes => (position.yes_quantity, position.no_quantity),
                            ContractType::No => (position.no_quantity, position.yes_quantity),
                        };

                        if winning_qty > Decimal::ZERO {
                            let payout = winning_qty;
                            ledger::credit(
                                tx, &mut account, payout, TransactionType::SettlementWin,
                                None, None, Some(market_id), "settlement payout",
                            )
                            .await?;
                            total_paid_out += payout;
                        }
                        if losing_qty > Decimal::ZERO {
                            ledger::credit(
                                tx, &mut account, Decimal::ZERO, TransactionType::SettlementLoss,
                                None, None, Some(market_id), "settlement: losing side, zero payout",
                            )
                            .await?;
                        }

                        position.yes_quantity = Decimal::ZERO;
                        position.no_quantity = Decimal::ZERO;
                        position.reserved_yes_quantity = Decimal::ZERO;
                        position.reserved_no_quantity = Decimal::ZERO;
                        position.updated_at = chrono::Utc::now();
                        ledger::write_position(tx, &position).await?;
                        positions_settled += 1;
                    }

                    let new_status = match outcome {
                        ContractType::Yes => MarketStatus::SettledYes,
                        ContractType::No => MarketStatus::SettledNo,
                    };
                    sqlx::query("UPDATE markets SET status = $1, winning_outcome = $2, updated_at = now() WHERE id = $3")
                        .bind(new_status)
                        .bind(match outcome {
                            ContractType::Yes => "yes",
                            ContractType::No => "no",
                        })
                        .bind(market_id)
                        .execute(&mut **tx)
                        .await?;

                    Ok(SettlementStats {
                        market_id,
                        winning_outcome: outcome,
                        positions_settled,
                        orders_cancelled,
                        total_paid_out,
                    })
                })
            },
        )
        .await
    }

    /// Charges `qty * (1 + fee)` and mints `qty` YES and `qty` NO at a
    /// 50c cost basis each.
    pub async fn mint_complete_set(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        qty: Decimal,
    ) -> Result<MintStats, ServiceError> {
        if qty <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity { value: qty }.into());
        }
        let fee_rate = self.fee_rate;
        crate::db::tx::with_serializable_retry(
            &self.db.pool,
            5,
            std::time::Duration::from_millis(10),
            |tx| {
                Box::pin(async move {
                    let market = sqlx::query_as::<_, crate::models::Market>(
                        "SELECT * FROM markets WHERE id = $1 FOR UPDATE",
                    )
                    .bind(market_id)
                    .fetch_one(&mut **tx)
                    .await?;
                    if market.status != MarketStatus::Active {
                        return Err(ServiceError::Domain(EngineError::MarketNotActive {
                            market_id,
                            status: format!("{:?}", market.status),
                        }));
                    }

                    let mut account = ledger::lock_account(tx, user_id).await?;
                    let mut position = ledger::lock_position(tx, user_id, market_id).await?;

                    let cost = qty * (Decimal::ONE + fee_rate);
                    ledger::charge(
                        tx, &mut account, cost, TransactionType::Mint,
                        None, None, Some(market_id), "mint complete set",
                    )
                    .await?;

                    let fifty_cents = Decimal::from(50);
                    position.apply_buy_fill(ContractType::Yes, qty, fifty_cents);
                    position.apply_buy_fill(ContractType::No, qty, fifty_cents);
                    ledger::write_position(tx, &position).await?;

                    sqlx::query("UPDATE markets SET total_shares_outstanding = total_shares_outstanding + $1, updated_at = now() WHERE id = $2")
                        .bind(qty)
                        .bind(market_id)
                        .execute(&mut **tx)
                        .await?;

                    Ok(MintStats { market_id, quantity: qty, cost })
                })
            },
        )
        .await
    }

    /// Burns `qty` of each contract and credits `qty * (1 - fee)`.
    pub async fn redeem_complete_set(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        qty: Decimal,
    ) -> Result<RedeemStats, ServiceError> {
        if qty <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity { value: qty }.into());
        }
        let fee_rate = self.fee_rate;
        crate::db::tx::with_serializable_retry(
            &self.db.pool,
            5,
            std::time::Duration::from_millis(10),
            |tx| {
                Box::pin(async move {
                    let market = sqlx::query_as::<_, crate::models::Market>(
                        "SELECT * FROM markets WHERE id = $1 FOR UPDATE",
                    )
                    .bind(market_id)
                    .fetch_one(&mut **tx)
                    .await?;
                    if market.status != MarketStatus::Active {
                        return Err(ServiceError::Domain(EngineError::MarketNotActive {
                            market_id,
                            status: format!("{:?}", market.status),
                        }));
                    }

                    let mut account = ledger::lock_account(tx, user_id).await?;
                    let mut position = ledger::lock_position(tx, user_id, market_id).await?;

                    if position.yes_quantity < qty || position.no_quantity < qty {
                        let (required, available) = if position.yes_quantity < qty {
                            (qty, position.yes_quantity)
                        } else {
                            (qty, position.no_quantity)
                        };
                        return Err(ServiceError::Domain(EngineError::InsufficientPosition {
                            required,
                            available,
                            contract_type: ContractType::Yes,
                        }));
                    }

                    let fifty_cents = Decimal::from(50);
                    position.apply_sell_fill(ContractType::Yes, qty, fifty_cents);
                    position.apply_sell_fill(ContractType::No, qty, fifty_cents);
                    ledger::write_position(tx, &position).await?;

                    let payout = qty * (Decimal::ONE - fee_rate);
                    ledger::credit(
                        tx, &mut account, payout, TransactionType::Redeem,
                        None, None, Some(market_id), "redeem complete set",
                    )
                    .await?;

                    sqlx::query("UPDATE markets SET total_shares_outstanding = total_shares_outstanding - $1, updated_at = now() WHERE id = $2")
                        .bind(qty)
                        .bind(market_id)
                        .execute(&mut **tx)
                        .await?;

                    Ok(RedeemStats { market_id, quantity: qty, payout })
                })
            },
        )
        .await
    }
}
