use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::Result;
use crate::jobs::hold_expirer::{self, SweepStats};
use crate::models::operation_log::{OperationLogEntry, OperationType};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct OperationsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEntryResponse {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub operation: OperationType,
    pub actor: String,
    pub metadata: serde_json::Value,
}

impl From<OperationLogEntry> for OperationEntryResponse {
    fn from(entry: OperationLogEntry) -> Self {
        Self {
            id: entry.id,
            occurred_at: entry.occurred_at,
            operation: entry.operation,
            actor: entry.actor,
            metadata: entry.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsResponse {
    pub entries: Vec<OperationEntryResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub holds_examined: usize,
    pub holds_expired: usize,
    pub tiers_adjusted: usize,
    pub quantity_released: i32,
    pub orders_failed: usize,
}

impl From<SweepStats> for SweepResponse {
    fn from(stats: SweepStats) -> Self {
        Self {
            holds_examined: stats.holds_examined,
            holds_expired: stats.holds_expired,
            tiers_adjusted: stats.tiers_adjusted,
            quantity_released: stats.quantity_released,
            orders_failed: stats.orders_failed,
        }
    }
}

// Handlers

/// Recent audit log entries, newest first
async fn list_operations(
    State(state): State<AppState>,
    Query(params): Query<OperationsQuery>,
) -> Result<Json<OperationsResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let entries = state.store.recent_operations(limit).await?;

    Ok(Json(OperationsResponse {
        entries: entries.into_iter().map(OperationEntryResponse::from).collect(),
    }))
}

/// Run an expiry sweep on demand
///
/// The scheduler runs the same pass on its own interval; this endpoint
/// exists for operators and tests that cannot wait for it.
async fn sweep_expired_holds(State(state): State<AppState>) -> Result<Json<SweepResponse>> {
    let stats = hold_expirer::sweep_expired_holds(
        state.store.as_ref(),
        Utc::now(),
        state.config.sweep_batch_size,
    )
    .await?;

    Ok(Json(stats.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/operations", get(list_operations))
        .route("/sweep-expired-holds", post(sweep_expired_holds))
}
