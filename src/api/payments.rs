use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{EngineError, Result};
use crate::services::consumption::{self, ConsumeRequest};
use crate::store::ConsumeItem;

// Request/Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequestBody {
    pub order_id: Uuid,
    pub items: Vec<ConsumeItemBody>,
    pub payment_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeItemBody {
    pub tier_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub duplicate: bool,
    pub ticket_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

// Handlers

/// Payment confirmation callback
///
/// Business refusals come back as 200 with `success: false` so the payment
/// provider does not retry them; transport and validation problems keep
/// their HTTP status.
async fn consume(
    State(state): State<AppState>,
    Json(req): Json<ConsumeRequestBody>,
) -> Result<Json<ConsumeResponse>> {
    let order_id = req.order_id;
    let request = ConsumeRequest {
        order_id,
        items: req
            .items
            .iter()
            .map(|item| ConsumeItem {
                tier_id: item.tier_id,
                quantity: item.quantity,
            })
            .collect(),
        payment_ref: req.payment_ref,
    };

    match consumption::consume(state.store.as_ref(), request).await {
        Ok(outcome) => Ok(Json(ConsumeResponse {
            success: true,
            order_id: outcome.order.id,
            duplicate: outcome.duplicate,
            ticket_ids: outcome.ticket_ids,
            error_code: None,
        })),
        Err(err @ (EngineError::HoldExpired { .. } | EngineError::ConsumptionFailed { .. })) => {
            Ok(Json(ConsumeResponse {
                success: false,
                order_id,
                duplicate: false,
                ticket_ids: Vec::new(),
                error_code: Some(err.code().to_string()),
            }))
        }
        Err(err) => Err(err),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/consume", post(consume))
}
