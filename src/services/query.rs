//! Read-only views: order book depth snapshots from the in-memory cache,
//! and price history aggregated straight from the `trades` table.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::Database;
use crate::models::ContractType;
use crate::services::matching::{OrderbookRegistry, OrderbookSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Minute,
    Hour,
    Day,
}

impl Timeframe {
    fn bucket(self) -> &'static str {
        match self {
            Timeframe::Minute => "minute",
            Timeframe::Hour => "hour",
            Timeframe::Day => "day",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PricePoint {
    pub bucket: DateTime<Utc>,
    pub open_cents: i32,
    pub close_cents: i32,
    pub high_cents: i32,
    pub low_cents: i32,
    pub volume: Decimal,
}

pub struct QueryService {
    pub db: Database,
    pub books: std::sync::Arc<OrderbookRegistry>,
}

impl QueryService {
    pub fn new(db: Database, books: std::sync::Arc<OrderbookRegistry>) -> Self {
        Self { db, books }
    }

    /// Aggregated bid/ask depth for a market, read straight from the
    /// in-memory cache the matching engine maintains — no database round
    /// trip, and never consulted by the matching engine itself.
    pub fn get_orderbook(&self, market_id: Uuid, depth: usize) -> OrderbookSnapshot {
        self.books.get_or_create(market_id).snapshot(depth)
    }

    /// OHLCV-style price points for `contract_type`, bucketed by
    /// `timeframe`, oldest first. `open`/`close` are the first/last trade
    /// price within the bucket by execution order, not a bid/ask mid.
    pub async fn get_price_history(
        &self,
        market_id: Uuid,
        contract_type: ContractType,
        timeframe: Timeframe,
        limit: i64,
    ) -> Result<Vec<PricePoint>, sqlx::Error> {
        let query = format!(
            "SELECT bucket, open_cents, close_cents, high_cents, low_cents, volume FROM (
                SELECT
                    date_trunc('{bucket}', executed_at) AS bucket,
                    (array_agg(price_cents ORDER BY executed_at ASC))[1] AS open_cents,
                    (array_agg(price_cents ORDER BY executed_at DESC))[1] AS close_cents,
                    max(price_cents) AS high_cents,
                    min(price_cents) AS low_cents,
                    sum(quantity) AS volume
                FROM trades
                WHERE market_id = $1 AND contract_type = $2
                GROUP BY bucket
             ) buckets
             ORDER BY bucket DESC LIMIT $3",
            bucket = timeframe.bucket()
        );

        let mut rows: Vec<PricePoint> = sqlx::query_as(&query)
            .bind(market_id)
            .bind(contract_type)
            .bind(limit)
            .fetch_all(&self.db.pool)
            .await?;
        rows.reverse();
        Ok(rows)
    }
}
