use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{EngineError, Result};
use crate::models::tier::{CreateTierData, TicketTier};

// Request/Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTierBody {
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub total_quantity: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub total_quantity: i32,
    pub reserved_quantity: i32,
    pub sold_quantity: i32,
    pub available: i32,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<TicketTier> for TierResponse {
    fn from(tier: TicketTier) -> Self {
        Self {
            available: tier.available(),
            closed: tier.is_closed(),
            id: tier.id,
            event_id: tier.event_id,
            name: tier.name,
            price: tier.price,
            total_quantity: tier.total_quantity,
            reserved_quantity: tier.reserved_quantity,
            sold_quantity: tier.sold_quantity,
            closed_at: tier.closed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSalesResponse {
    pub tiers_closed: u64,
}

// Handlers

/// Create a ticket tier
async fn create_tier(
    State(state): State<AppState>,
    Json(req): Json<CreateTierBody>,
) -> Result<(StatusCode, Json<TierResponse>)> {
    if req.name.trim().is_empty() {
        return Err(EngineError::Validation(
            "tier name is required".to_string(),
        ));
    }
    if req.price < Decimal::ZERO {
        return Err(EngineError::Validation(
            "price must not be negative".to_string(),
        ));
    }
    if req.total_quantity < 0 {
        return Err(EngineError::Validation(
            "total quantity must not be negative".to_string(),
        ));
    }

    let tier = state
        .store
        .create_tier(CreateTierData {
            event_id: req.event_id,
            name: req.name,
            price: req.price,
            total_quantity: req.total_quantity,
        })
        .await?;

    tracing::info!(tier_id = %tier.id, event_id = %tier.event_id, "tier created");

    Ok((StatusCode::CREATED, Json(tier.into())))
}

/// Get a tier with its derived availability
async fn get_tier(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TierResponse>> {
    let tier = state
        .store
        .tier(id)
        .await?
        .ok_or(EngineError::TierNotFound(id))?;

    Ok(Json(tier.into()))
}

/// List an event's tiers
async fn list_event_tiers(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Vec<TierResponse>>> {
    let tiers = state.store.tiers_for_event(event_id).await?;

    Ok(Json(tiers.into_iter().map(TierResponse::from).collect()))
}

/// Stop sales for every tier of an event
///
/// Closing refuses new holds only. Existing holds stay valid until they
/// are consumed, canceled, or swept.
async fn close_sales(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<CloseSalesResponse>> {
    let tiers_closed = state.store.close_tiers_for_event(event_id).await?;

    tracing::info!(event_id = %event_id, tiers_closed, "sales closed");

    Ok(Json(CloseSalesResponse { tiers_closed }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tiers", post(create_tier))
        .route("/tiers/:id", get(get_tier))
        .route("/events/:event_id/tiers", get(list_event_tiers))
        .route("/events/:event_id/close-sales", post(close_sales))
}
