use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::hold::{CreateHoldData, Hold};
use crate::models::operation_log::SYSTEM_ACTOR;
use crate::models::order::{CreateOrderData, NewOrderItem, Order, OrderStatus};
use crate::store::InventoryStore;

/// One checkout attempt across one or more tiers of the same event.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub event_id: Uuid,
    pub items: Vec<ReserveItem>,
    pub owner: String,
    pub checkout_session_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ReserveItem {
    pub tier_id: Uuid,
    pub quantity: i32,
}

/// A placed reservation: the pending order plus its holds.
#[derive(Debug, Clone)]
pub struct ReserveOutcome {
    pub order: Order,
    pub holds: Vec<Hold>,
}

/// Places holds for a checkout attempt.
///
/// The reservation is all-or-nothing: every item gets its own atomic hold,
/// and the first refusal releases whatever was already acquired and cancels
/// the order before the error surfaces.
#[tracing::instrument(skip(store, request), fields(event_id = %request.event_id, owner = %request.owner))]
pub async fn reserve(
    store: &dyn InventoryStore,
    request: ReserveRequest,
    hold_ttl: Duration,
) -> Result<ReserveOutcome> {
    // 1. Validate the request shape
    validate_items(&request.items)?;

    // 2. Price the order against the current tiers
    let mut order_items = Vec::with_capacity(request.items.len());
    let mut total = Decimal::ZERO;
    for item in &request.items {
        let tier = store
            .tier(item.tier_id)
            .await?
            .ok_or(EngineError::TierNotFound(item.tier_id))?;
        if tier.event_id != request.event_id {
            return Err(EngineError::Validation(format!(
                "tier {} does not belong to event {}",
                item.tier_id, request.event_id
            )));
        }
        if tier.is_closed() {
            return Err(EngineError::TierClosed(item.tier_id));
        }
        total += tier.price * Decimal::from(item.quantity);
        order_items.push(NewOrderItem {
            tier_id: item.tier_id,
            quantity: item.quantity,
            unit_price: tier.price,
        });
    }

    // 3. Record the pending order with its priced line items
    let order = store
        .create_order(CreateOrderData {
            event_id: request.event_id,
            owner: request.owner.clone(),
            checkout_session_id: request.checkout_session_id.clone(),
            total_amount: total,
            items: order_items,
        })
        .await?;

    // 4. Place one atomic hold per item
    let expires_at = Utc::now() + hold_ttl;
    let mut holds = Vec::with_capacity(request.items.len());
    for item in &request.items {
        let data = CreateHoldData {
            tier_id: item.tier_id,
            order_id: order.id,
            quantity: item.quantity,
            owner: request.owner.clone(),
            checkout_session_id: request.checkout_session_id.clone(),
            expires_at,
        };
        match store.create_hold(data).await {
            Ok(hold) => holds.push(hold),
            Err(err) => {
                unwind_reservation(store, order.id, &holds).await;
                return Err(err);
            }
        }
    }

    tracing::info!(
        order_id = %order.id,
        holds = holds.len(),
        total_amount = %order.total_amount,
        "reservation placed"
    );
    Ok(ReserveOutcome { order, holds })
}

/// Cancels a single hold. Idempotent: a hold that already left `active`
/// reports `false` rather than an error.
#[tracing::instrument(skip(store))]
pub async fn cancel_hold(store: &dyn InventoryStore, hold_id: Uuid) -> Result<bool> {
    let hold = store
        .hold(hold_id)
        .await?
        .ok_or(EngineError::HoldNotFound(hold_id))?;

    let released = store.release_hold(hold_id, &hold.owner).await?;
    if released {
        tracing::info!(
            tier_id = %hold.tier_id,
            quantity = hold.quantity,
            "hold released"
        );
    } else {
        tracing::debug!("hold already terminal, nothing to release");
    }
    Ok(released)
}

fn validate_items(items: &[ReserveItem]) -> Result<()> {
    if items.is_empty() {
        return Err(EngineError::Validation(
            "at least one item is required".to_string(),
        ));
    }
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity <= 0 {
            return Err(EngineError::Validation(format!(
                "quantity for tier {} must be positive",
                item.tier_id
            )));
        }
        if seen.contains(&item.tier_id) {
            return Err(EngineError::Validation(format!(
                "tier {} appears more than once",
                item.tier_id
            )));
        }
        seen.push(item.tier_id);
    }
    Ok(())
}

/// Returns already-acquired holds to the pool after a partial failure.
/// A failed release is logged and left to the sweeper's TTL pass.
async fn unwind_reservation(store: &dyn InventoryStore, order_id: Uuid, holds: &[Hold]) {
    for hold in holds {
        if let Err(err) = store.release_hold(hold.id, SYSTEM_ACTOR).await {
            tracing::error!(
                hold_id = %hold.id,
                error = %err,
                "failed to release hold while unwinding reservation"
            );
        }
    }
    if let Err(err) = store
        .transition_order(order_id, OrderStatus::Pending, OrderStatus::Canceled)
        .await
    {
        tracing::error!(
            order_id = %order_id,
            error = %err,
            "failed to cancel order while unwinding reservation"
        );
    }
}
