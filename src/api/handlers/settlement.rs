//! Settlement and complete-set handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ContractType;
use crate::services::settlement::{MintStats, RedeemStats, SettlementStats};
use crate::utils::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SettleMarketRequest {
    pub outcome: ContractType,
}

pub async fn settle_market(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Json(req): Json<SettleMarketRequest>,
) -> Result<Json<ApiResponse<SettlementStats>>, AppError> {
    let stats = state.settlement_service.settle_market(market_id, req.outcome).await?;
    let paid_out_cents = i64::try_from((stats.total_paid_out * Decimal::from(100)).round()).unwrap_or(0);
    crate::metrics::record_settlement("settle_market", paid_out_cents);
    Ok(Json(ApiResponse::success(stats)))
}

#[derive(Debug, Deserialize)]
pub struct CompleteSetRequest {
    pub user_id: Uuid,
    pub quantity: Decimal,
}

pub async fn mint_complete_set(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Json(req): Json<CompleteSetRequest>,
) -> Result<Json<ApiResponse<MintStats>>, AppError> {
    let stats = state.settlement_service.mint_complete_set(market_id, req.user_id, req.quantity).await?;
    let cost_cents = i64::try_from((stats.cost * Decimal::from(100)).round()).unwrap_or(0);
    crate::metrics::record_settlement("mint_complete_set", cost_cents);
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn redeem_complete_set(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Json(req): Json<CompleteSetRequest>,
) -> Result<Json<ApiResponse<RedeemStats>>, AppError> {
    let stats = state.settlement_service.redeem_complete_set(market_id, req.user_id, req.quantity).await?;
    let payout_cents = i64::try_from((stats.payout * Decimal::from(100)).round()).unwrap_or(0);
    crate::metrics::record_settlement("redeem_complete_set", payout_cents);
    Ok(Json(ApiResponse::success(stats)))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthResponse>> {
    let status = if state.db.health_check().await { "ok" } else { "degraded" };
    Json(ApiResponse::success(HealthResponse { status }))
}
