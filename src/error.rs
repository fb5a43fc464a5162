use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("insufficient inventory for tier {tier_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        tier_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("hold {hold_id} is no longer active")]
    HoldExpired { hold_id: Uuid },

    #[error("consumption of order {order_id} failed: {reason}")]
    ConsumptionFailed { order_id: Uuid, reason: String },

    #[error("tier not found: {0}")]
    TierNotFound(Uuid),

    #[error("tier {0} is closed for sales")]
    TierClosed(Uuid),

    #[error("hold not found: {0}")]
    HoldNotFound(Uuid),

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InsufficientInventory { .. } => "insufficient_inventory",
            EngineError::HoldExpired { .. } => "hold_expired",
            EngineError::ConsumptionFailed { .. } => "consumption_failed",
            EngineError::TierNotFound(_) => "tier_not_found",
            EngineError::TierClosed(_) => "tier_closed",
            EngineError::HoldNotFound(_) => "hold_not_found",
            EngineError::OrderNotFound(_) => "order_not_found",
            EngineError::Validation(_) => "validation",
            EngineError::Database(_) => "database",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::InsufficientInventory { .. }
            | EngineError::HoldExpired { .. }
            | EngineError::ConsumptionFailed { .. }
            | EngineError::TierClosed(_) => StatusCode::CONFLICT,
            EngineError::TierNotFound(_)
            | EngineError::HoldNotFound(_)
            | EngineError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            // Never leak driver-level detail to callers.
            EngineError::Database(err) => {
                tracing::error!(error = %err, "database error reached the API boundary");
                "Database error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
