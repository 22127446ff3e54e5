//! Bookmaker-style AMM: guarantees bounded house loss by widening quotes
//! with a vig and rejecting trades that would blow through an imbalance
//! or loss cap, rather than moving price along a scoring-rule curve.
//!
//! Grounded in `bookmaker_amm.py`'s `get_prices_with_vig`/`can_accept_bet`/
//! `calculate_sell_payout`, adapted to the `(1+fee)`/`(1-fee)` and
//! `AmmPool`/`AmmTrade` shapes shared with the LMSR engine.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{EngineError, ServiceError};
use crate::models::{AmmPool, AmmSide, AmmTrade, ContractType, MarketStatus, TransactionType};
use crate::services::ledger;
use crate::utils::money;

pub const VIG: f64 = 0.05;
pub const MAX_LOSS: f64 = 200.00;
pub const MAX_IMBALANCE: f64 = 200.0;

pub struct BookmakerEngine {
    pub db: Database,
}

/// `imbalance = (q_y − q_n) / max(q_y+q_n, 10)`, clipped to `[-1, 1]`.
fn imbalance(q_yes: f64, q_no: f64) -> f64 {
    let total = q_yes + q_no;
    ((q_yes - q_no) / total.max(10.0)).clamp(-1.0, 1.0)
}

/// Buy quotes: `50 + vig/2 ± 10·imbalance`, each clamped to `[1, 99]`.
/// The two sum to roughly `100 + vig·100`.
pub fn buy_quotes(q_yes: f64, q_no: f64) -> (i32, i32) {
    let vig_half = VIG * 100.0 / 2.0;
    let imb = imbalance(q_yes, q_no);
    let yes = money::quantize_cents(50.0 + vig_half + 10.0 * imb);
    let no = money::quantize_cents(50.0 + vig_half - 10.0 * imb);
    (yes, no)
}

/// Fair (no-vig) display prices, summing to exactly 100.
fn fair_prices(q_yes: f64, q_no: f64) -> (i32, i32) {
    let fair_prob = 0.5 + imbalance(q_yes, q_no) / 2.0;
    let yes = money::quantize_cents(fair_prob * 100.0);
    (yes, 100 - yes)
}

fn exposure(pool_balance: f64, q_yes: f64, q_no: f64) -> (f64, f64) {
    (q_yes - pool_balance, q_no - pool_balance)
}

impl BookmakerEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn buy(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        contract_type: ContractType,
        quantity: Decimal,
    ) -> Result<AmmTrade, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity { value: quantity }.into());
        }

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

                    let mut pool = sqlx::query_as::<_, AmmPool>(
                        "SELECT * FROM amm_pools WHERE market_id = $1 FOR UPDATE",
                    )
                    .bind(market_id)
                    .fetch_one(&mut **tx)
                    .await?;

                    let mut account = ledger::lock_account(tx, user_id).await?;
                    let mut position = ledger::lock_position(tx, user_id, market_id).await?;

                    let q_yes: f64 = pool.yes_shares.try_into().unwrap_or(0.0);
                    let q_no: f64 = pool.no_shares.try_into().unwrap_or(0.0);
                    let qty: f64 = quantity.try_into().unwrap_or(0.0);
                    let money_collected: f64 = pool.pool_balance.try_into().unwrap_or(0.0);

                    let (price_before_cents, _) = fair_prices(q_yes, q_no);
                    let (yes_quote, no_quote) = buy_quotes(q_yes, q_no);
                    let price_cents = match contract_type {
                        ContractType::Yes => yes_quote,
                        ContractType::No => no_quote,
                    };

                    let base_cost = Decimal::from(price_cents) / Decimal::from(100) * quantity;
                    let fee = base_cost * pool.fee_percentage;
                    let total_cost = base_cost + fee;

                    let (new_q_yes, new_q_no) = match contract_type {
                        ContractType::Yes => (q_yes + qty, q_no),
                        ContractType::No => (q_yes, q_no + qty),
                    };

                    // Imbalance cap.
                    if (new_q_yes - new_q_no).abs() > MAX_IMBALANCE {
                        return Err(ServiceError::Domain(EngineError::BookmakerRejected {
                            reason: format!(
                                "would create too much imbalance ({:.0} shares, max {})",
                                (new_q_yes - new_q_no).abs(),
                                MAX_IMBALANCE
                            ),
                        }));
                    }

                    // Loss cap: max(yes_payout, no_payout) - money_collected <= MAX_LOSS.
                    let new_money = money_collected + f64::try_from(base_cost).unwrap_or(0.0);
                    let (yes_exposure, no_exposure) = exposure(new_money, new_q_yes, new_q_no);
                    if yes_exposure.max(no_exposure) > MAX_LOSS {
                        return Err(ServiceError::Domain(EngineError::BookmakerRejected {
                            reason: format!(
                                "would exceed max loss cap of {:.2}",
                                MAX_LOSS
                            ),
                        }));
                    }

                    ledger::charge(
                        tx, &mut account, total_cost, TransactionType::TradeBuy,
                        None, None, Some(market_id), "bookmaker buy",
                    )
                    .await?;

                    position.apply_buy_fill(contract_type, quantity, Decimal::from(price_cents));
                    ledger::write_position(tx, &position).await?;

                    pool.yes_shares = Decimal::try_from(new_q_yes).unwrap_or(pool.yes_shares);
                    pool.no_shares = Decimal::try_from(new_q_no).unwrap_or(pool.no_shares);
                    pool.pool_balance += base_cost;
                    pool.total_fees_collected += fee;
                    pool.updated_at = chrono::Utc::now();
                    write_pool(tx, &pool).await?;

                    let (yes_after, no_after) = fair_prices(new_q_yes, new_q_no);
                    let price_after_cents = match contract_type {
                        ContractType::Yes => yes_after,
                        ContractType::No => no_after,
                    };
                    update_market_prices(tx, market_id, yes_after, no_after, quantity).await?;

                    let trade = AmmTrade {
                        id: Uuid::new_v4(),
                        pool_id: pool.id,
                        market_id,
                        user_id,
                        side: AmmSide::Buy,
                        contract_type,
                        quantity,
                        price_before_cents,
                        price_after_cents,
                        avg_price_cents: Decimal::from(price_cents),
                        total_cost,
                        fee_amount: fee,
                        created_at: chrono::Utc::now(),
                    };
                    insert_trade(tx, &trade).await?;
                    Ok(trade)
                })
            },
        )
        .await
    }

    pub async fn sell(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        contract_type: ContractType,
        quantity: Decimal,
    ) -> Result<AmmTrade, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity { value: quantity }.into());
        }

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

                    let mut pool = sqlx::query_as::<_, AmmPool>(
                        "SELECT * FROM amm_pools WHERE market_id = $1 FOR UPDATE",
                    )
                    .bind(market_id)
                    .fetch_one(&mut **tx)
                    .await?;

                    let mut account = ledger::lock_account(tx, user_id).await?;
                    let mut position = ledger::lock_position(tx, user_id, market_id).await?;

                    let held = match contract_type {
                        ContractType::Yes => position.available_yes(),
                        ContractType::No => position.available_no(),
                    };
                    if held < quantity {
                        return Err(ServiceError::Domain(EngineError::InsufficientPosition {
                            required: quantity,
                            available: held,
                            contract_type,
                        }));
                    }

                    let q_yes: f64 = pool.yes_shares.try_into().unwrap_or(0.0);
                    let q_no: f64 = pool.no_shares.try_into().unwrap_or(0.0);

                    let (price_before_cents, _) = fair_prices(q_yes, q_no);
                    // Sellers get fair probability minus half the vig.
                    let fair_prob = 0.5 + imbalance(q_yes, q_no) / 2.0;
                    let raw_price = match contract_type {
                        ContractType::Yes => fair_prob * (1.0 - VIG / 2.0) * 100.0,
                        ContractType::No => (1.0 - fair_prob) * (1.0 - VIG / 2.0) * 100.0,
                    };
                    let price_cents = money::quantize_cents(raw_price);

                    let base_payout = Decimal::from(price_cents) / Decimal::from(100) * quantity;
                    let fee = base_payout * pool.fee_percentage;
                    let net_payout = base_payout - fee;

                    ledger::credit(
                        tx, &mut account, net_payout, TransactionType::TradeSell,
                        None, None, Some(market_id), "bookmaker sell",
                    )
                    .await?;

                    position.apply_sell_fill(contract_type, quantity, Decimal::from(price_cents));
                    ledger::write_position(tx, &position).await?;

                    let qty: f64 = quantity.try_into().unwrap_or(0.0);
                    let (new_q_yes, new_q_no) = match contract_type {
                        ContractType::Yes => (q_yes - qty, q_no),
                        ContractType::No => (q_yes, q_no - qty),
                    };
                    pool.yes_shares = Decimal::try_from(new_q_yes).unwrap_or(pool.yes_shares);
                    pool.no_shares = Decimal::try_from(new_q_no).unwrap_or(pool.no_shares);
                    pool.pool_balance -= base_payout;
                    pool.total_fees_collected += fee;
                    pool.updated_at = chrono::Utc::now();
                    write_pool(tx, &pool).await?;

                    let (yes_after, no_after) = fair_prices(new_q_yes, new_q_no);
                    let price_after_cents = match contract_type {
                        ContractType::Yes => yes_after,
                        ContractType::No => no_after,
                    };
                    update_market_prices(tx, market_id, yes_after, no_after, quantity).await?;

                    let trade = AmmTrade {
                        id: Uuid::new_v4(),
                        pool_id: pool.id,
                        market_id,
                        user_id,
                        side: AmmSide::Sell,
                        contract_type,
                        quantity,
                        price_before_cents,
                        price_after_cents,
                        avg_price_cents: Decimal::from(price_cents),
                        total_cost: net_payout,
                        fee_amount: fee,
                        created_at: chrono::Utc::now(),
                    };
                    insert_trade(tx, &trade).await?;
                    Ok(trade)
                })
            },
        )
        .await
    }

    /// Maximum quantity fillable on `contract_type` before the imbalance
    /// or loss cap binds, for callers that want to split a request
    /// between this engine and the order book.
    pub async fn max_fillable_quantity(
        &self,
        market_id: Uuid,
        contract_type: ContractType,
    ) -> Result<Decimal, sqlx::Error> {
        let pool = sqlx::query_as::<_, AmmPool>("SELECT * FROM amm_pools WHERE market_id = $1")
            .bind(market_id)
            .fetch_one(&self.db.pool)
            .await?;

        let q_yes: f64 = pool.yes_shares.try_into().unwrap_or(0.0);
        let q_no: f64 = pool.no_shares.try_into().unwrap_or(0.0);
        let money_collected: f64 = pool.pool_balance.try_into().unwrap_or(0.0);
        let (yes_quote, no_quote) = buy_quotes(q_yes, q_no);

        let (imbalance_limit, price_cents, current_exposure) = match contract_type {
            ContractType::Yes => (
                MAX_IMBALANCE + q_no - q_yes,
                yes_quote,
                q_yes - money_collected,
            ),
            ContractType::No => (
                MAX_IMBALANCE + q_yes - q_no,
                no_quote,
                q_no - money_collected,
            ),
        };

        let price_factor = 1.0 - (price_cents as f64 / 100.0);
        let loss_limit = if price_factor <= 0.0 {
            0.0
        } else {
            (MAX_LOSS - current_exposure) / price_factor
        };

        let max_qty = imbalance_limit.min(loss_limit).max(0.0);
        Ok(Decimal::try_from(max_qty.floor()).unwrap_or(Decimal::ZERO))
    }
}

async fn write_pool(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, pool: &AmmPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE amm_pools SET yes_shares = $1, no_shares = $2, pool_balance = $3,
            total_fees_collected = $4, updated_at = $5 WHERE id = $6",
    )
    .bind(pool.yes_shares)
    .bind(pool.no_shares)
    .bind(pool.pool_balance)
    .bind(pool.total_fees_collected)
    .bind(pool.updated_at)
    .bind(pool.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_market_prices(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market_id: Uuid,
    yes_cents: i32,
    no_cents: i32,
    volume: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE markets SET last_yes_price = $1, last_no_price = $2,
            total_volume = total_volume + $3, updated_at = now() WHERE id = $4",
    )
    .bind(yes_cents)
    .bind(no_cents)
    .bind(volume)
    .bind(market_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_trade(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, trade: &AmmTrade) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO amm_trades (id, pool_id, market_id, user_id, side, contract_type,
            quantity, price_before_cents, price_after_cents, avg_price_cents,
            total_cost, fee_amount, created_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
    )
    .bind(trade.id)
    .bind(trade.pool_id)
    .bind(trade.market_id)
    .bind(trade.user_id)
    .bind(trade.side)
    .bind(trade.contract_type)
    .bind(trade.quantity)
    .bind(trade.price_before_cents)
    .bind(trade.price_after_cents)
    .bind(trade.avg_price_cents)
    .bind(trade.total_cost)
    .bind(trade.fee_amount)
    .bind(trade.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imbalance_is_zero_when_balanced() {
        assert_eq!(imbalance(50.0, 50.0), 0.0);
    }

    #[test]
    fn imbalance_clips_to_unit_interval() {
        assert_eq!(imbalance(1000.0, 0.0), 1.0);
        assert_eq!(imbalance(0.0, 1000.0), -1.0);
    }

    #[test]
    fn buy_quotes_sum_to_roughly_vig_over_par() {
        let (yes, no) = buy_quotes(0.0, 0.0);
        assert_eq!(yes + no, 105);
    }

    #[test]
    fn buy_quotes_favor_the_underweight_side() {
        let (yes, no) = buy_quotes(150.0, 50.0);
        assert!(yes > no);
    }
}
