use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::operation_log::NewLogEntry;
use crate::models::order::OrderStatus;
use crate::store::InventoryStore;

#[derive(Debug, Default)]
pub struct SweepStats {
    pub holds_examined: usize,
    pub holds_expired: usize,
    pub tiers_adjusted: usize,
    pub quantity_released: i32,
    pub orders_failed: usize,
}

/// Background job that expires overdue holds and returns their quantity
/// to the pool.
///
/// For each active hold whose deadline has passed:
/// 1. Flip the hold to expired; a hold that already left active is skipped
/// 2. Subtract won quantities from each tier's reserved count
/// 3. Fail the pending orders the expired holds belonged to
/// 4. Record one bulk release entry for the whole pass
///
/// Every step is safe to race against checkout and payment traffic: the
/// status flip is the single point of contention, and only its winner
/// adjusts counts.
pub async fn sweep_expired_holds(
    store: &dyn InventoryStore,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<SweepStats> {
    let mut stats = SweepStats::default();

    let due = store.due_holds(now, batch_size).await?;
    stats.holds_examined = due.len();
    if due.is_empty() {
        return Ok(stats);
    }

    tracing::info!(due_holds = stats.holds_examined, "starting hold sweep");

    // 1. Claim each hold; losers were consumed or released in the meantime
    let mut released_by_tier: HashMap<Uuid, i32> = HashMap::new();
    let mut affected_orders: Vec<Uuid> = Vec::new();
    for hold in &due {
        match store.expire_hold(hold.id).await {
            Ok(true) => {
                stats.holds_expired += 1;
                *released_by_tier.entry(hold.tier_id).or_insert(0) += hold.quantity;
                if !affected_orders.contains(&hold.order_id) {
                    affected_orders.push(hold.order_id);
                }
            }
            Ok(false) => {
                tracing::debug!(hold_id = %hold.id, "hold no longer active, skipping");
            }
            Err(err) => {
                tracing::error!(hold_id = %hold.id, error = %err, "failed to expire hold");
            }
        }
    }

    // 2. Return won quantities to their tiers
    for (&tier_id, &quantity) in &released_by_tier {
        match store.adjust_quantities(tier_id, -quantity, 0).await {
            Ok(_) => {
                stats.tiers_adjusted += 1;
                stats.quantity_released += quantity;
            }
            Err(err) => {
                tracing::error!(
                    tier_id = %tier_id,
                    quantity = quantity,
                    error = %err,
                    "failed to release expired quantity"
                );
            }
        }
    }

    // 3. Fail pending orders whose holds expired
    for order_id in &affected_orders {
        match store
            .transition_order(*order_id, OrderStatus::Pending, OrderStatus::Failed)
            .await
        {
            Ok(true) => {
                stats.orders_failed += 1;
            }
            Ok(false) => {
                tracing::debug!(order_id = %order_id, "order already settled, leaving as is");
            }
            Err(err) => {
                tracing::error!(order_id = %order_id, error = %err, "failed to fail order");
            }
        }
    }

    // 4. One audit entry for the whole pass
    if stats.holds_expired > 0 {
        store
            .append_log(NewLogEntry::bulk_release(
                stats.holds_expired,
                &released_by_tier,
                stats.orders_failed,
            ))
            .await?;
    }

    tracing::info!(?stats, "hold sweep completed");

    Ok(stats)
}
