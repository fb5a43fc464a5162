use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Issued,
    Revoked,
}

/// A confirmed ticket. Created exactly once per unit of a consumed hold,
/// never by any other path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tier_id: Uuid,
    pub event_id: Uuid,
    pub owner: String,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
}
