//! Serializable-transaction discipline for the concurrency and resource
//! model. Every engine primitive runs inside one SERIALIZABLE transaction;
//! on a serialization conflict the whole transaction aborts and is retried
//! a bounded number of times with exponential backoff and jitter.
//!
//! Grounded in the `with_serializable_tx!` macro and SQLSTATE handling of
//! `examples/other_examples/97494afc_..._lmsr_api.rs.rs`.

use rand::Rng;
use sqlx::postgres::PgPool;
use std::time::Duration;

/// PostgreSQL SQLSTATE codes that indicate a transaction should be retried
/// rather than surfaced to the caller.
pub mod sqlstate {
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const ACTIVE_SQL_TRANSACTION: &str = "25001";
}

pub fn is_retryable(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code == sqlstate::SERIALIZATION_FAILURE
                || code == sqlstate::DEADLOCK_DETECTED
                || code == sqlstate::ACTIVE_SQL_TRANSACTION;
        }
    }
    false
}

/// Runs `body` inside a SERIALIZABLE transaction, retrying on serialization
/// conflicts and deadlocks up to `max_attempts` times with exponential
/// backoff plus jitter (`base_delay * 2^attempt`, +/- 20%).
pub async fn with_serializable_retry<F, Fut, T, E>(
    pool: &PgPool,
    max_attempts: u32,
    base_delay: Duration,
    mut body: F,
) -> Result<T, E>
where
    F: FnMut(&mut sqlx::Transaction<'_, sqlx::Postgres>) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: From<sqlx::Error>,
{
    let mut attempt = 0u32;
    loop {
        let mut tx = pool.begin().await.map_err(E::from)?;
        if let Err(e) = sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
        {
            return Err(E::from(e));
        }

        // `tx` is dropped (and rolled back) on every path below that does
        // not reach `commit`.
        let body_result = body(&mut tx).await;
        let body_err = match body_result {
            Ok(value) => match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(commit_err) => commit_err,
            },
            Err(err) => {
                drop(tx);
                return Err(err);
            }
        };

        if is_retryable(&body_err) && attempt + 1 < max_attempts {
            attempt += 1;
            sleep_with_jitter(base_delay, attempt).await;
            continue;
        }
        return Err(E::from(body_err));
    }
}

async fn sleep_with_jitter(base_delay: Duration, attempt: u32) {
    let backoff = base_delay.saturating_mul(1u32 << attempt.min(10));
    let jitter_frac = rand::thread_rng().gen_range(0.8..1.2);
    let millis = (backoff.as_millis() as f64 * jitter_frac) as u64;
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// Acquires row locks in the global deterministic order required to avoid
/// deadlocks across concurrent matches: Market, then Users sorted by id,
/// then Positions sorted by id, then Orders sorted by id, then the AMM
/// Pool. Callers pass already-sorted id
/// lists; this function only documents and enforces the *order* of lock
/// acquisition, not the sort itself (sorting is the caller's
/// responsibility since it requires domain knowledge of which ids are
/// involved).
pub struct LockOrder;

impl LockOrder {
    pub async fn lock_market(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        market_id: uuid::Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT id FROM markets WHERE id = $1 FOR UPDATE")
            .bind(market_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn lock_accounts_sorted(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        mut user_ids: Vec<uuid::Uuid>,
    ) -> Result<(), sqlx::Error> {
        user_ids.sort();
        user_ids.dedup();
        for id in user_ids {
            sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    pub async fn lock_positions_sorted(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        mut position_ids: Vec<uuid::Uuid>,
    ) -> Result<(), sqlx::Error> {
        position_ids.sort();
        position_ids.dedup();
        for id in position_ids {
            sqlx::query("SELECT id FROM positions WHERE id = $1 FOR UPDATE")
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    pub async fn lock_orders_sorted(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        mut order_ids: Vec<uuid::Uuid>,
    ) -> Result<(), sqlx::Error> {
        order_ids.sort();
        order_ids.dedup();
        for id in order_ids {
            sqlx::query("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    pub async fn lock_amm_pool(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        market_id: uuid::Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT id FROM amm_pools WHERE market_id = $1 FOR UPDATE")
            .bind(market_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
