use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Canceled,
}

/// A buyer's intended purchase, grouping the holds placed at checkout.
///
/// Pending orders either become paid (consumption), failed (a hold
/// expired) or canceled (the buyer released a hold).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub event_id: Uuid,
    pub owner: String,
    pub checkout_session_id: String,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Priced line item recorded at reservation time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tier_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub tier_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateOrderData {
    pub event_id: Uuid,
    pub owner: String,
    pub checkout_session_id: String,
    pub total_amount: Decimal,
    pub items: Vec<NewOrderItem>,
}

impl Order {
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Pending).unwrap(),
            "\"pending\""
        );
        let back: OrderStatus = serde_json::from_str("\"canceled\"").unwrap();
        assert_eq!(back, OrderStatus::Canceled);
    }
}
