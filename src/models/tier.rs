use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One sellable category of tickets for an event.
///
/// The three quantity columns form the ledger: `reserved_quantity` counts
/// units under active holds, `sold_quantity` counts issued tickets, and
/// `total_quantity - reserved_quantity - sold_quantity` is what can still
/// be held. Counts only ever change through guarded adjustments.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketTier {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub total_quantity: i32,
    pub reserved_quantity: i32,
    pub sold_quantity: i32,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTierData {
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub total_quantity: i32,
}

impl TicketTier {
    /// Units still open to new holds.
    pub fn available(&self) -> i32 {
        self.total_quantity - self.reserved_quantity - self.sold_quantity
    }

    /// Closed tiers refuse new holds; existing holds still run their course.
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Whether applying the given deltas would keep the ledger consistent.
    pub fn can_adjust(&self, reserved_delta: i32, sold_delta: i32) -> bool {
        let reserved = self.reserved_quantity + reserved_delta;
        let sold = self.sold_quantity + sold_delta;
        reserved >= 0 && sold >= 0 && reserved + sold <= self.total_quantity
    }
}
