use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::FromRow;
use uuid::Uuid;

pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    HoldCreated,
    HoldReleased,
    HoldConsumed,
    BulkRelease,
    ConsumptionFailed,
}

/// Append-only audit record. Rows are never updated or deleted; sweeps
/// write one summarizing entry rather than one per hold.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OperationLogEntry {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub operation: OperationType,
    pub actor: String,
    pub metadata: JsonValue,
}

/// Entry about to be appended. The constructors below are the only place
/// metadata shapes are defined, so every backend writes identical records.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub operation: OperationType,
    pub actor: String,
    pub metadata: JsonValue,
}

impl NewLogEntry {
    pub fn hold_created(
        hold_id: Uuid,
        order_id: Uuid,
        tier_id: Uuid,
        quantity: i32,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            operation: OperationType::HoldCreated,
            actor: owner.to_string(),
            metadata: json!({
                "hold_id": hold_id,
                "order_id": order_id,
                "tier_id": tier_id,
                "quantity": quantity,
                "expires_at": expires_at,
            }),
        }
    }

    pub fn hold_released(
        hold_id: Uuid,
        order_id: Uuid,
        tier_id: Uuid,
        quantity: i32,
        actor: &str,
    ) -> Self {
        Self {
            operation: OperationType::HoldReleased,
            actor: actor.to_string(),
            metadata: json!({
                "hold_id": hold_id,
                "order_id": order_id,
                "tier_id": tier_id,
                "quantity": quantity,
            }),
        }
    }

    pub fn hold_consumed(order_id: Uuid, hold_ids: &[Uuid], ticket_count: usize) -> Self {
        Self {
            operation: OperationType::HoldConsumed,
            actor: SYSTEM_ACTOR.to_string(),
            metadata: json!({
                "order_id": order_id,
                "hold_ids": hold_ids,
                "ticket_count": ticket_count,
            }),
        }
    }

    pub fn bulk_release(
        holds_expired: usize,
        released_by_tier: &HashMap<Uuid, i32>,
        orders_failed: usize,
    ) -> Self {
        Self {
            operation: OperationType::BulkRelease,
            actor: SYSTEM_ACTOR.to_string(),
            metadata: json!({
                "holds_expired": holds_expired,
                "released_by_tier": released_by_tier,
                "orders_failed": orders_failed,
            }),
        }
    }

    pub fn consumption_failed(order_id: Uuid, reason: &str) -> Self {
        Self {
            operation: OperationType::ConsumptionFailed,
            actor: SYSTEM_ACTOR.to_string(),
            metadata: json!({
                "order_id": order_id,
                "reason": reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&OperationType::BulkRelease).unwrap(),
            "\"bulk_release\""
        );
        let back: OperationType = serde_json::from_str("\"hold_consumed\"").unwrap();
        assert_eq!(back, OperationType::HoldConsumed);
    }

    #[test]
    fn bulk_release_metadata_keys_tiers_by_id() {
        let tier = Uuid::new_v4();
        let mut by_tier = HashMap::new();
        by_tier.insert(tier, 7);

        let entry = NewLogEntry::bulk_release(3, &by_tier, 2);
        assert_eq!(entry.actor, SYSTEM_ACTOR);
        assert_eq!(entry.metadata["holds_expired"], 3);
        assert_eq!(entry.metadata["orders_failed"], 2);
        assert_eq!(entry.metadata["released_by_tier"][tier.to_string()], 7);
    }

    #[test]
    fn hold_created_records_the_owner_as_actor() {
        let entry = NewLogEntry::hold_created(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            2,
            "buyer-9",
            Utc::now(),
        );
        assert_eq!(entry.operation, OperationType::HoldCreated);
        assert_eq!(entry.actor, "buyer-9");
        assert_eq!(entry.metadata["quantity"], 2);
    }
}
