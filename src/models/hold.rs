use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "hold_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Active,
    Consumed,
    Expired,
    Released,
}

impl HoldStatus {
    /// A hold leaves `active` exactly once and never returns.
    pub fn is_terminal(self) -> bool {
        self != HoldStatus::Active
    }
}

/// A time-limited claim on tier inventory, placed at checkout start.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Hold {
    pub id: Uuid,
    pub tier_id: Uuid,
    pub order_id: Uuid,
    pub quantity: i32,
    pub owner: String,
    pub checkout_session_id: String,
    pub status: HoldStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateHoldData {
    pub tier_id: Uuid,
    pub order_id: Uuid,
    pub quantity: i32,
    pub owner: String,
    pub checkout_session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// True once the TTL has elapsed. An overdue hold stays consumable
    /// until a sweep actually claims it.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
