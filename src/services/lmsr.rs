//! LMSR (logarithmic market scoring rule) AMM.
//!
//! `q_yes`/`q_no` are tracked as `f64` for the `exp`/`ln` scoring-rule
//! math, mirroring the `q_yes: f64, q_no: f64, b: f64` core of
//! `lmsr_core.rs.rs`; every result is quantized back to `Decimal`/cents
//! before it leaves this module or touches a ledger entry.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{EngineError, ServiceError};
use crate::models::{AmmPool, AmmSide, AmmTrade, ContractType, MarketStatus, TransactionType};
use crate::services::ledger;
use crate::utils::money;

pub struct LmsrEngine {
    pub db: Database,
}

/// `C(q_y, q_n) = b * ln(exp(q_y/b) + exp(q_n/b))`, computed with the
/// log-sum-exp stabilization so large outstanding share counts never
/// overflow `exp`.
fn cost(q_yes: f64, q_no: f64, b: f64) -> f64 {
    let a = q_yes / b;
    let c = q_no / b;
    let m = a.max(c);
    b * (m + ((a - m).exp() + (c - m).exp()).ln())
}

/// `p_yes = exp(q_y/b) / (exp(q_y/b) + exp(q_n/b))`, same stabilization.
fn prob_yes(q_yes: f64, q_no: f64, b: f64) -> f64 {
    let a = q_yes / b;
    let c = q_no / b;
    let m = a.max(c);
    let ey = (a - m).exp();
    let en = (c - m).exp();
    ey / (ey + en)
}

fn displayed_yes_cents(q_yes: f64, q_no: f64, b: f64) -> i32 {
    money::quantize_cents(prob_yes(q_yes, q_no, b) * 100.0)
}

impl LmsrEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Buys `quantity` of `contract_type`, charging `Δ·(1+fee)` where
    /// `Δ = C(q + n·e_s) − C(q)`.
    pub async fn buy(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        contract_type: ContractType,
        quantity: Decimal,
    ) -> Result<AmmTrade, ServiceError> {
        self.execute(market_id, user_id, AmmSide::Buy, contract_type, quantity).await
    }

    /// Sells `quantity`, crediting `Δ·(1−fee)` where
    /// `Δ = C(q) − C(q − n·e_s)`. Fails `InsufficientLiquidity` if
    /// selling more than the pool has outstanding on that side.
    pub async fn sell(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        contract_type: ContractType,
        quantity: Decimal,
    ) -> Result<AmmTrade, ServiceError> {
        self.execute(market_id, user_id, AmmSide::Sell, contract_type, quantity).await
    }

    async fn execute(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        side: AmmSide,
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

                    let b = pool.liquidity_b.try_into().unwrap_or(100.0_f64);
                    let q_yes: f64 = pool.yes_shares.try_into().unwrap_or(0.0);
                    let q_no: f64 = pool.no_shares.try_into().unwrap_or(0.0);
                    let n: f64 = quantity.try_into().unwrap_or(0.0);

                    let price_before_cents = displayed_yes_cents(q_yes, q_no, b);

                    let (new_q_yes, new_q_no) = match (side, contract_type) {
                        (AmmSide::Buy, ContractType::Yes) => (q_yes + n, q_no),
                        (AmmSide::Buy, ContractType::No) => (q_yes, q_no + n),
                        (AmmSide::Sell, ContractType::Yes) => (q_yes - n, q_no),
                        (AmmSide::Sell, ContractType::No) => (q_yes, q_no - n),
                    };

                    if side == AmmSide::Sell {
                        let outstanding = match contract_type {
                            ContractType::Yes => q_yes,
                            ContractType::No => q_no,
                        };
                        if n > outstanding {
                            return Err(ServiceError::Domain(EngineError::InsufficientLiquidity));
                        }
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
                    }

                    let pre_cost = cost(q_yes, q_no, b);
                    let post_cost = cost(new_q_yes, new_q_no, b);
                    let delta = (post_cost - pre_cost).abs();
                    let delta_decimal = Decimal::try_from(delta).unwrap_or(Decimal::ZERO);
                    let fee_rate = pool.fee_percentage;

                    let (total_cost, fee_amount, avg_price_cents) = match side {
                        AmmSide::Buy => {
                            let fee = delta_decimal * fee_rate;
                            let charge_amount = delta_decimal + fee;
                            ledger::charge(
                                tx, &mut account, charge_amount, TransactionType::TradeBuy,
                                None, None, Some(market_id), "LMSR buy",
                            )
                            .await?;
                            let avg = (delta_decimal / quantity) * Decimal::from(100);
                            position.apply_buy_fill(contract_type, quantity, avg);
                            (charge_amount, fee, avg)
                        }
                        AmmSide::Sell => {
                            let fee = delta_decimal * fee_rate;
                            let credit_amount = delta_decimal - fee;
                            let avg = (delta_decimal / quantity) * Decimal::from(100);
                            position.apply_sell_fill(contract_type, quantity, avg);
                            ledger::credit(
                                tx, &mut account, credit_amount, TransactionType::TradeSell,
                                None, None, Some(market_id), "LMSR sell",
                            )
                            .await?;
                            (credit_amount, fee, avg)
                        }
                    };

                    ledger::write_position(tx, &position).await?;

                    pool.yes_shares = Decimal::try_from(new_q_yes).unwrap_or(pool.yes_shares);
                    pool.no_shares = Decimal::try_from(new_q_no).unwrap_or(pool.no_shares);
                    pool.total_fees_collected += fee_amount;
                    pool.pool_balance += match side {
                        AmmSide::Buy => delta_decimal,
                        AmmSide::Sell => -delta_decimal,
                    };
                    pool.updated_at = chrono::Utc::now();
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

                    let price_after_cents = displayed_yes_cents(new_q_yes, new_q_no, b);
                    let (last_yes, last_no) = (price_after_cents, 100 - price_after_cents);
                    sqlx::query(
                        "UPDATE markets SET last_yes_price = $1, last_no_price = $2, updated_at = now() WHERE id = $3",
                    )
                    .bind(last_yes)
                    .bind(last_no)
                    .bind(market_id)
                    .execute(&mut **tx)
                    .await?;

                    let trade = AmmTrade {
                        id: Uuid::new_v4(),
                        pool_id: pool.id,
                        market_id,
                        user_id,
                        side,
                        contract_type,
                        quantity,
                        price_before_cents,
                        price_after_cents,
                        avg_price_cents,
                        total_cost,
                        fee_amount,
                        created_at: chrono::Utc::now(),
                    };
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

                    Ok(trade)
                })
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_function_is_symmetric_at_zero() {
        assert!((cost(0.0, 0.0, 100.0) - 100.0 * 2.0_f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn prob_yes_is_half_at_equal_quantities() {
        assert!((prob_yes(50.0, 50.0, 100.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn prob_yes_favors_the_larger_side() {
        assert!(prob_yes(80.0, 20.0, 100.0) > 0.5);
    }

    #[test]
    fn displayed_cents_sum_to_one_hundred_with_no_side() {
        let yes = displayed_yes_cents(30.0, 70.0, 100.0);
        assert!(yes < 50);
        assert!(yes >= 1 && yes <= 99);
    }
}
