use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::operation_log::NewLogEntry;
use crate::models::order::{Order, OrderItem};
use crate::store::{ConsumeItem, InventoryStore};

/// Payment confirmation for an order, as delivered by the provider's
/// webhook. Deliveries are at-least-once, so replays are expected input.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub order_id: Uuid,
    pub items: Vec<ConsumeItem>,
    pub payment_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConsumeOutcome {
    pub order: Order,
    pub ticket_ids: Vec<Uuid>,
    pub duplicate: bool,
}

/// Converts a paid order's holds into tickets.
///
/// The first successful call issues the tickets; every replay for the same
/// order returns the original tickets with `duplicate` set. Business
/// refusals (expired holds, mismatched items) are recorded in the operation
/// log before they surface.
#[tracing::instrument(skip(store, request), fields(order_id = %request.order_id))]
pub async fn consume(
    store: &dyn InventoryStore,
    request: ConsumeRequest,
) -> Result<ConsumeOutcome> {
    // 1. Validate the request shape
    validate_items(&request.items)?;

    // 2. The paid items must be exactly what the order reserved
    let order = store
        .order(request.order_id)
        .await?
        .ok_or(EngineError::OrderNotFound(request.order_id))?;
    let lines = store.order_items(order.id).await?;
    if let Err(reason) = items_match_lines(&request.items, &lines) {
        tracing::warn!(reason = %reason, "payment items do not match the order");
        record_failure(store, order.id, &reason).await;
        return Err(EngineError::ConsumptionFailed {
            order_id: order.id,
            reason,
        });
    }

    // 3. Atomic conversion; replays short-circuit inside the store
    match store
        .consume_order(order.id, &request.items, request.payment_ref.as_deref())
        .await
    {
        Ok(consumption) => {
            let ticket_ids: Vec<Uuid> = consumption.tickets.iter().map(|t| t.id).collect();
            if consumption.duplicate {
                tracing::info!(
                    tickets = ticket_ids.len(),
                    "replayed confirmation, returning original tickets"
                );
            } else {
                tracing::info!(tickets = ticket_ids.len(), "order consumed");
            }
            Ok(ConsumeOutcome {
                order: consumption.order,
                ticket_ids,
                duplicate: consumption.duplicate,
            })
        }
        Err(err @ (EngineError::HoldExpired { .. } | EngineError::ConsumptionFailed { .. })) => {
            tracing::warn!(error = %err, "consumption rejected");
            record_failure(store, order.id, &err.to_string()).await;
            Err(err)
        }
        Err(err) => Err(err),
    }
}

fn validate_items(items: &[ConsumeItem]) -> Result<()> {
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

/// Compares the webhook's items to the order's recorded line items. Both
/// directions must match: no altered quantities, no extra tiers, no
/// missing lines.
fn items_match_lines(
    items: &[ConsumeItem],
    lines: &[OrderItem],
) -> std::result::Result<(), String> {
    let mut expected: HashMap<Uuid, i32> =
        lines.iter().map(|l| (l.tier_id, l.quantity)).collect();
    for item in items {
        match expected.remove(&item.tier_id) {
            Some(quantity) if quantity == item.quantity => {}
            Some(quantity) => {
                return Err(format!(
                    "tier {}: paid quantity {} does not match reserved quantity {}",
                    item.tier_id, item.quantity, quantity
                ));
            }
            None => {
                return Err(format!("tier {} is not part of the order", item.tier_id));
            }
        }
    }
    if let Some(tier_id) = expected.keys().next() {
        return Err(format!("order line for tier {tier_id} missing from payment"));
    }
    Ok(())
}

async fn record_failure(store: &dyn InventoryStore, order_id: Uuid, reason: &str) {
    if let Err(err) = store
        .append_log(NewLogEntry::consumption_failed(order_id, reason))
        .await
    {
        tracing::error!(error = %err, "failed to record consumption failure");
    }
}
