//! Error layers: domain errors (`EngineError`) and the HTTP response
//! wrapper (`AppError`).
//!
//! `EngineError` is the structured domain-error layer: every variant
//! describes a precondition violation that is surfaced to the caller with
//! no mutation performed and no Transaction record written. Infrastructure
//! errors (sqlx, serialization conflicts) are retried by the transaction
//! helpers in `db::tx` or bubble up untyped after retries are exhausted.

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::ContractType;
use crate::utils::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("insufficient {contract_type:?} position: required {required}, available {available}")]
    InsufficientPosition {
        required: Decimal,
        available: Decimal,
        contract_type: ContractType,
    },

    #[error("invalid price: {value}")]
    InvalidPrice { value: Decimal },

    #[error("invalid quantity: {value}")]
    InvalidQuantity { value: Decimal },

    #[error("market {market_id} is not active (status: {status})")]
    MarketNotActive { market_id: Uuid, status: String },

    #[error("order {id} not found")]
    OrderNotFound { id: Uuid },

    #[error("order {id} cannot be cancelled: {reason}")]
    OrderCancellation { id: Uuid, reason: String },

    #[error("self-trade rejected")]
    SelfTrade,

    #[error("insufficient AMM liquidity")]
    InsufficientLiquidity,

    #[error("market {market_id} is not settleable (status: {status})")]
    MarketNotSettleable { market_id: Uuid, status: String },

    #[error("trade rejected by bookmaker admission control: {reason}")]
    BookmakerRejected { reason: String },
}

impl EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::OrderNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InsufficientFunds { .. }
            | EngineError::InsufficientPosition { .. }
            | EngineError::InvalidPrice { .. }
            | EngineError::InvalidQuantity { .. }
            | EngineError::MarketNotActive { .. }
            | EngineError::OrderCancellation { .. }
            | EngineError::SelfTrade
            | EngineError::InsufficientLiquidity
            | EngineError::MarketNotSettleable { .. }
            | EngineError::BookmakerRejected { .. } => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::InsufficientPosition { .. } => "INSUFFICIENT_POSITION",
            EngineError::InvalidPrice { .. } => "INVALID_PRICE",
            EngineError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            EngineError::MarketNotActive { .. } => "MARKET_NOT_ACTIVE",
            EngineError::OrderNotFound { .. } => "ORDER_NOT_FOUND",
            EngineError::OrderCancellation { .. } => "ORDER_CANCELLATION",
            EngineError::SelfTrade => "SELF_TRADE",
            EngineError::InsufficientLiquidity => "INSUFFICIENT_LIQUIDITY",
            EngineError::MarketNotSettleable { .. } => "MARKET_NOT_SETTLEABLE",
            EngineError::BookmakerRejected { .. } => "BOOKMAKER_REJECTED",
        }
    }
}

/// The domain and infrastructure error layers joined into one type so service functions
/// running inside a retried transaction can return a single `Result`.
/// Domain failures pass through with no mutation and no log entry;
/// infrastructure failures are what `db::tx::with_serializable_retry`
/// inspects to decide whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] EngineError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Top-level application error returned from axum handlers. Infrastructure
/// failures (db, anyhow) are wrapped opaquely; domain failures pass their
/// code/message straight through, the same split `utils/response.rs::AppError`
/// makes.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        Self {
            status: e.status_code(),
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Domain(domain) => domain.into(),
            ServiceError::Db(db) => db.into(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("database error: {e}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "DB_ERROR".to_string(),
            message: "database error".to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!("internal error: {e:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::error(&self.code, &self.message);
        (self.status, Json(body)).into_response()
    }
}
