//! Market read views: listing, a single market, the order book snapshot,
//! and price history.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::market::MarketResponse;
use crate::services::query::Timeframe;
use crate::utils::response::ApiResponse;
use crate::AppState;

pub async fn list_markets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<MarketResponse>>>, AppError> {
    let markets = sqlx::query_as::<_, crate::models::Market>("SELECT * FROM markets ORDER BY created_at DESC")
        .fetch_all(&state.db.pool)
        .await?;
    Ok(Json(ApiResponse::success(markets.into_iter().map(Into::into).collect())))
}

pub async fn get_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
) -> Result<Json<ApiResponse<MarketResponse>>, AppError> {
    let market = sqlx::query_as::<_, crate::models::Market>("SELECT * FROM markets WHERE id = $1")
        .bind(market_id)
        .fetch_one(&state.db.pool)
        .await?;
    Ok(Json(ApiResponse::success(market.into())))
}

#[derive(Debug, Deserialize)]
pub struct OrderbookQuery {
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    20
}

pub async fn get_orderbook(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Query(q): Query<OrderbookQuery>,
) -> Json<ApiResponse<crate::services::matching::OrderbookSnapshot>> {
    let snapshot = state.query_service.get_orderbook(market_id, q.depth);
    Json(ApiResponse::success(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct PriceHistoryQuery {
    pub contract_type: crate::models::ContractType,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_timeframe() -> String {
    "hour".to_string()
}

fn default_limit() -> i64 {
    200
}

pub async fn get_price_history(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Query(q): Query<PriceHistoryQuery>,
) -> Result<Json<ApiResponse<Vec<crate::services::query::PricePoint>>>, AppError> {
    let timeframe = match q.timeframe.as_str() {
        "minute" => Timeframe::Minute,
        "day" => Timeframe::Day,
        _ => Timeframe::Hour,
    };
    let points = state
        .query_service
        .get_price_history(market_id, q.contract_type, timeframe, q.limit)
        .await?;
    Ok(Json(ApiResponse::success(points)))
}
