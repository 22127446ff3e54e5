//! Order placement/cancellation handlers — thin adapters over
//! `MatchingEngine`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{CreateOrderRequest, OrderResponse};
use crate::models::trade::TradeResponse;
use crate::utils::response::ApiResponse;
use crate::AppState;

#[derive(Debug, serde::Serialize)]
pub struct PlaceOrderResponse {
    pub order: OrderResponse,
    pub trades: Vec<TradeResponse>,
}

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<PlaceOrderResponse>>, AppError> {
    use validator::Validate;
    req.validate().map_err(|e| anyhow::anyhow!(e))?;

    crate::metrics::record_order_submitted(
        &format!("{:?}", req.side).to_lowercase(),
        &format!("{:?}", req.order_type).to_lowercase(),
    );
    let timer = crate::metrics::Timer::new();

    // TODO: derive from an authenticated session once an auth layer exists.
    let user_id = req.market_id;

    let result = state
        .matching_engine
        .place_order(req.market_id, user_id, req.side, req.contract_type, req.order_type, req.price, req.quantity)
        .await?;
    crate::metrics::record_order_match_duration(timer.elapsed_secs());

    for trade in &result.trades {
        let volume_cents = rust_decimal::Decimal::from(trade.price_cents) * trade.quantity;
        crate::metrics::record_trade_executed(
            &format!("{:?}", trade.trade_type).to_lowercase(),
            i64::try_from(volume_cents.round()).unwrap_or(0),
        );
    }

    Ok(Json(ApiResponse::success(PlaceOrderResponse {
        order: result.order.into(),
        trades: result.trades.into_iter().map(Into::into).collect(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderQuery {
    pub user_id: Uuid,
}

pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    axum::extract::Query(q): axum::extract::Query<CancelOrderQuery>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = state.matching_engine.cancel_order(order_id, q.user_id).await?;
    crate::metrics::record_order_cancelled();
    Ok(Json(ApiResponse::success(order.into())))
}
