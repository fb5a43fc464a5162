use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::Result;
use crate::models::hold::Hold;
use crate::services::hold_manager::{self, ReserveItem, ReserveRequest};

// Request/Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequestBody {
    pub event_id: Uuid,
    pub items: Vec<ReserveItemBody>,
    pub owner: String,
    pub checkout_session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveItemBody {
    pub tier_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    pub order_id: Uuid,
    pub total_amount: Decimal,
    pub holds: Vec<HeldItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldItem {
    pub hold_id: Uuid,
    pub tier_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
}

impl From<Hold> for HeldItem {
    fn from(hold: Hold) -> Self {
        Self {
            hold_id: hold.id,
            tier_id: hold.tier_id,
            quantity: hold.quantity,
            expires_at: hold.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelHoldBody {
    pub hold_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelHoldResponse {
    pub released: bool,
}

// Handlers

/// Place holds for a checkout attempt
async fn reserve(
    State(state): State<AppState>,
    Json(req): Json<ReserveRequestBody>,
) -> Result<(StatusCode, Json<ReserveResponse>)> {
    let request = ReserveRequest {
        event_id: req.event_id,
        items: req
            .items
            .iter()
            .map(|item| ReserveItem {
                tier_id: item.tier_id,
                quantity: item.quantity,
            })
            .collect(),
        owner: req.owner,
        checkout_session_id: req.checkout_session_id,
    };

    let ttl = Duration::minutes(state.config.hold_ttl_minutes);
    let outcome = hold_manager::reserve(state.store.as_ref(), request, ttl).await?;

    let response = ReserveResponse {
        order_id: outcome.order.id,
        total_amount: outcome.order.total_amount,
        holds: outcome.holds.into_iter().map(HeldItem::from).collect(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Release a hold before its deadline
async fn cancel_hold(
    State(state): State<AppState>,
    Json(req): Json<CancelHoldBody>,
) -> Result<Json<CancelHoldResponse>> {
    let released = hold_manager::cancel_hold(state.store.as_ref(), req.hold_id).await?;

    Ok(Json(CancelHoldResponse { released }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reserve", post(reserve))
        .route("/cancel-hold", post(cancel_hold))
}
