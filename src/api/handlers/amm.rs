//! AMM trade handlers for both engines. Each market uses exactly one AMM
//! engine at a time (chosen at market creation, out of scope here); the
//! request path picked is an operator/caller decision, not validated here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::amm_pool::AmmTrade;
use crate::models::ContractType;
use crate::utils::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AmmTradeRequest {
    pub user_id: Uuid,
    pub contract_type: ContractType,
    pub quantity: Decimal,
}

pub async fn lmsr_buy(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Json(req): Json<AmmTradeRequest>,
) -> Result<Json<ApiResponse<AmmTrade>>, AppError> {
    let trade = state.lmsr_engine.buy(market_id, req.user_id, req.contract_type, req.quantity).await?;
    record_amm_trade("lmsr", &trade);
    Ok(Json(ApiResponse::success(trade)))
}

pub async fn lmsr_sell(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Json(req): Json<AmmTradeRequest>,
) -> Result<Json<ApiResponse<AmmTrade>>, AppError> {
    let trade = state.lmsr_engine.sell(market_id, req.user_id, req.contract_type, req.quantity).await?;
    record_amm_trade("lmsr", &trade);
    Ok(Json(ApiResponse::success(trade)))
}

pub async fn bookmaker_buy(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Json(req): Json<AmmTradeRequest>,
) -> Result<Json<ApiResponse<AmmTrade>>, AppError> {
    let trade = state.bookmaker_engine.buy(market_id, req.user_id, req.contract_type, req.quantity).await?;
    record_amm_trade("bookmaker", &trade);
    Ok(Json(ApiResponse::success(trade)))
}

pub async fn bookmaker_sell(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<Uuid>,
    Json(req): Json<AmmTradeRequest>,
) -> Result<Json<ApiResponse<AmmTrade>>, AppError> {
    let trade = state.bookmaker_engine.sell(market_id, req.user_id, req.contract_type, req.quantity).await?;
    record_amm_trade("bookmaker", &trade);
    Ok(Json(ApiResponse::success(trade)))
}

fn record_amm_trade(engine: &str, trade: &AmmTrade) {
    let volume_cents = i64::try_from(trade.total_cost.round()).unwrap_or(0);
    crate::metrics::record_amm_trade(engine, volume_cents);
}
