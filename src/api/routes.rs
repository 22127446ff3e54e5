//! The HTTP surface: a thin, unauthenticated adapter over the engine
//! services. Kept small on purpose — routing/auth/rate-limiting is not
//! this crate's concern, just enough wiring to make it a runnable service.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::api::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::settlement::health))
        .route("/markets", get(handlers::markets::list_markets))
        .route("/markets/:market_id", get(handlers::markets::get_market))
        .route("/markets/:market_id/orderbook", get(handlers::markets::get_orderbook))
        .route("/markets/:market_id/price-history", get(handlers::markets::get_price_history))
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:order_id", axum::routing::delete(handlers::orders::cancel_order))
        .route("/markets/:market_id/lmsr/buy", post(handlers::amm::lmsr_buy))
        .route("/markets/:market_id/lmsr/sell", post(handlers::amm::lmsr_sell))
        .route("/markets/:market_id/bookmaker/buy", post(handlers::amm::bookmaker_buy))
        .route("/markets/:market_id/bookmaker/sell", post(handlers::amm::bookmaker_sell))
        .route("/markets/:market_id/settle", post(handlers::settlement::settle_market))
        .route("/markets/:market_id/mint", post(handlers::settlement::mint_complete_set))
        .route("/markets/:market_id/redeem", post(handlers::settlement::redeem_complete_set))
        .layer(axum::middleware::from_fn(crate::api::middleware::metrics_middleware))
        .with_state(state)
}
