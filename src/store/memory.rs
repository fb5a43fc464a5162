use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::hold::{CreateHoldData, Hold, HoldStatus};
use crate::models::operation_log::{NewLogEntry, OperationLogEntry};
use crate::models::order::{CreateOrderData, Order, OrderItem, OrderStatus};
use crate::models::ticket::{Ticket, TicketStatus};
use crate::models::tier::{CreateTierData, TicketTier};

use super::{lost_hold_error, ConsumeItem, Consumption, InventoryStore};

/// In-memory backend. All state sits behind one lock, so every store
/// operation is a single serialization point and observes the same
/// all-or-nothing behavior as a Postgres transaction. Used by the test
/// suites and for embedding without a database.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    tiers: HashMap<Uuid, TicketTier>,
    holds: HashMap<Uuid, Hold>,
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, Vec<OrderItem>>,
    tickets: HashMap<Uuid, Vec<Ticket>>,
    log: Vec<OperationLogEntry>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_adjustment(
    inner: &mut MemoryInner,
    tier_id: Uuid,
    reserved_delta: i32,
    sold_delta: i32,
) -> Result<TicketTier> {
    let tier = inner
        .tiers
        .get_mut(&tier_id)
        .ok_or(EngineError::TierNotFound(tier_id))?;

    if !tier.can_adjust(reserved_delta, sold_delta) {
        if reserved_delta > 0 {
            return Err(EngineError::InsufficientInventory {
                tier_id,
                requested: reserved_delta,
                available: tier.available(),
            });
        }
        return Err(EngineError::Validation(format!(
            "adjustment ({}, {}) violates invariants of tier {}",
            reserved_delta, sold_delta, tier_id
        )));
    }

    tier.reserved_quantity += reserved_delta;
    tier.sold_quantity += sold_delta;
    tier.updated_at = Utc::now();
    Ok(tier.clone())
}

fn record(inner: &mut MemoryInner, entry: NewLogEntry) -> OperationLogEntry {
    let entry = OperationLogEntry {
        id: Uuid::new_v4(),
        occurred_at: Utc::now(),
        operation: entry.operation,
        actor: entry.actor,
        metadata: entry.metadata,
    };
    inner.log.push(entry.clone());
    entry
}

fn order_holds(inner: &MemoryInner, order_id: Uuid) -> Vec<Hold> {
    let mut holds: Vec<Hold> = inner
        .holds
        .values()
        .filter(|h| h.order_id == order_id)
        .cloned()
        .collect();
    holds.sort_by_key(|h| h.created_at);
    holds
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn create_tier(&self, data: CreateTierData) -> Result<TicketTier> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let tier = TicketTier {
            id: Uuid::new_v4(),
            event_id: data.event_id,
            name: data.name,
            price: data.price,
            total_quantity: data.total_quantity,
            reserved_quantity: 0,
            sold_quantity: 0,
            closed_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.tiers.insert(tier.id, tier.clone());
        Ok(tier)
    }

    async fn tier(&self, tier_id: Uuid) -> Result<Option<TicketTier>> {
        let inner = self.inner.read().await;
        Ok(inner.tiers.get(&tier_id).cloned())
    }

    async fn tiers_for_event(&self, event_id: Uuid) -> Result<Vec<TicketTier>> {
        let inner = self.inner.read().await;
        let mut tiers: Vec<TicketTier> = inner
            .tiers
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        tiers.sort_by_key(|t| t.created_at);
        Ok(tiers)
    }

    async fn close_tiers_for_event(&self, event_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut closed = 0;
        for tier in inner.tiers.values_mut() {
            if tier.event_id == event_id && tier.closed_at.is_none() {
                tier.closed_at = Some(now);
                tier.updated_at = now;
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn adjust_quantities(
        &self,
        tier_id: Uuid,
        reserved_delta: i32,
        sold_delta: i32,
    ) -> Result<TicketTier> {
        let mut inner = self.inner.write().await;
        apply_adjustment(&mut inner, tier_id, reserved_delta, sold_delta)
    }

    async fn active_hold_total(&self, tier_id: Uuid) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .holds
            .values()
            .filter(|h| h.tier_id == tier_id && h.is_active())
            .map(|h| i64::from(h.quantity))
            .sum())
    }

    async fn create_hold(&self, data: CreateHoldData) -> Result<Hold> {
        if data.quantity <= 0 {
            return Err(EngineError::Validation(
                "hold quantity must be positive".to_string(),
            ));
        }

        let mut inner = self.inner.write().await;

        let tier = inner
            .tiers
            .get(&data.tier_id)
            .ok_or(EngineError::TierNotFound(data.tier_id))?;
        if tier.is_closed() {
            return Err(EngineError::TierClosed(data.tier_id));
        }
        if tier.available() < data.quantity {
            return Err(EngineError::InsufficientInventory {
                tier_id: data.tier_id,
                requested: data.quantity,
                available: tier.available(),
            });
        }
        if !inner.orders.contains_key(&data.order_id) {
            return Err(EngineError::OrderNotFound(data.order_id));
        }

        apply_adjustment(&mut inner, data.tier_id, data.quantity, 0)?;

        let now = Utc::now();
        let hold = Hold {
            id: Uuid::new_v4(),
            tier_id: data.tier_id,
            order_id: data.order_id,
            quantity: data.quantity,
            owner: data.owner,
            checkout_session_id: data.checkout_session_id,
            status: HoldStatus::Active,
            expires_at: data.expires_at,
            created_at: now,
            updated_at: now,
        };
        inner.holds.insert(hold.id, hold.clone());
        record(
            &mut inner,
            NewLogEntry::hold_created(
                hold.id,
                hold.order_id,
                hold.tier_id,
                hold.quantity,
                &hold.owner,
                hold.expires_at,
            ),
        );
        Ok(hold)
    }

    async fn hold(&self, hold_id: Uuid) -> Result<Option<Hold>> {
        let inner = self.inner.read().await;
        Ok(inner.holds.get(&hold_id).cloned())
    }

    async fn holds_for_order(&self, order_id: Uuid) -> Result<Vec<Hold>> {
        let inner = self.inner.read().await;
        Ok(order_holds(&inner, order_id))
    }

    async fn release_hold(&self, hold_id: Uuid, actor: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;

        let hold = inner
            .holds
            .get(&hold_id)
            .cloned()
            .ok_or(EngineError::HoldNotFound(hold_id))?;
        if !hold.is_active() {
            return Ok(false);
        }

        let now = Utc::now();
        apply_adjustment(&mut inner, hold.tier_id, -hold.quantity, 0)?;
        if let Some(h) = inner.holds.get_mut(&hold_id) {
            h.status = HoldStatus::Released;
            h.updated_at = now;
        }
        if let Some(order) = inner.orders.get_mut(&hold.order_id) {
            if order.status == OrderStatus::Pending {
                order.status = OrderStatus::Canceled;
                order.updated_at = now;
            }
        }
        record(
            &mut inner,
            NewLogEntry::hold_released(hold.id, hold.order_id, hold.tier_id, hold.quantity, actor),
        );
        Ok(true)
    }

    async fn due_holds(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Hold>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Hold> = inner
            .holds
            .values()
            .filter(|h| h.is_active() && h.is_past_expiry(now))
            .cloned()
            .collect();
        due.sort_by_key(|h| h.expires_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn expire_hold(&self, hold_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.holds.get_mut(&hold_id) {
            Some(h) if h.is_active() => {
                h.status = HoldStatus::Expired;
                h.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_order(&self, data: CreateOrderData) -> Result<Order> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            event_id: data.event_id,
            owner: data.owner,
            checkout_session_id: data.checkout_session_id,
            total_amount: data.total_amount,
            status: OrderStatus::Pending,
            payment_ref: None,
            created_at: now,
            updated_at: now,
        };
        let items: Vec<OrderItem> = data
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                tier_id: item.tier_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();
        inner.orders.insert(order.id, order.clone());
        inner.order_items.insert(order.id, items);
        Ok(order)
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let inner = self.inner.read().await;
        Ok(inner.orders.get(&order_id).cloned())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let inner = self.inner.read().await;
        Ok(inner.order_items.get(&order_id).cloned().unwrap_or_default())
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.orders.get_mut(&order_id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_order(
        &self,
        order_id: Uuid,
        items: &[ConsumeItem],
        payment_ref: Option<&str>,
    ) -> Result<Consumption> {
        let mut inner = self.inner.write().await;

        let order = inner
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(EngineError::OrderNotFound(order_id))?;

        match order.status {
            OrderStatus::Paid => {
                let tickets = inner.tickets.get(&order_id).cloned().unwrap_or_default();
                return Ok(Consumption {
                    order,
                    tickets,
                    duplicate: true,
                });
            }
            OrderStatus::Failed => {
                return Err(lost_hold_error(&order_holds(&inner, order_id), order_id, None))
            }
            OrderStatus::Canceled => {
                return Err(EngineError::ConsumptionFailed {
                    order_id,
                    reason: "order was canceled".to_string(),
                })
            }
            OrderStatus::Pending => {}
        }

        // Validate every line against live holds before mutating anything;
        // there is no rollback inside the lock. Holds claimed by an earlier
        // line are out of play for later ones.
        let holds = order_holds(&inner, order_id);
        let mut to_consume: Vec<Uuid> = Vec::new();
        let mut adjustments: Vec<(Uuid, i32, i32)> = Vec::new();
        for item in items {
            let (free, claimed): (Vec<&Hold>, Vec<&Hold>) = holds
                .iter()
                .filter(|h| h.tier_id == item.tier_id && h.is_active())
                .partition(|h| !to_consume.contains(&h.id));
            let covered: i32 = free.iter().map(|h| h.quantity).sum();
            if covered < item.quantity {
                if let Some(hold) = claimed.first() {
                    return Err(EngineError::HoldExpired { hold_id: hold.id });
                }
                return Err(lost_hold_error(&holds, order_id, Some(item.tier_id)));
            }
            to_consume.extend(free.iter().map(|h| h.id));
            adjustments.push((item.tier_id, covered, item.quantity));
        }

        let now = Utc::now();
        for hold_id in &to_consume {
            if let Some(h) = inner.holds.get_mut(hold_id) {
                h.status = HoldStatus::Consumed;
                h.updated_at = now;
            }
        }
        for &(tier_id, transitioned, sold) in &adjustments {
            apply_adjustment(&mut inner, tier_id, -transitioned, sold)?;
        }

        let mut tickets = Vec::new();
        for item in items {
            for _ in 0..item.quantity {
                tickets.push(Ticket {
                    id: Uuid::new_v4(),
                    order_id,
                    tier_id: item.tier_id,
                    event_id: order.event_id,
                    owner: order.owner.clone(),
                    status: TicketStatus::Issued,
                    issued_at: now,
                });
            }
        }
        inner
            .tickets
            .entry(order_id)
            .or_default()
            .extend(tickets.iter().cloned());

        let order = match inner.orders.get_mut(&order_id) {
            Some(o) => {
                o.status = OrderStatus::Paid;
                o.payment_ref = payment_ref.map(str::to_string);
                o.updated_at = now;
                o.clone()
            }
            None => order,
        };

        record(
            &mut inner,
            NewLogEntry::hold_consumed(order_id, &to_consume, tickets.len()),
        );

        Ok(Consumption {
            order,
            tickets,
            duplicate: false,
        })
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>> {
        let inner = self.inner.read().await;
        Ok(inner.tickets.get(&order_id).cloned().unwrap_or_default())
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<OperationLogEntry> {
        let mut inner = self.inner.write().await;
        Ok(record(&mut inner, entry))
    }

    async fn recent_operations(&self, limit: i64) -> Result<Vec<OperationLogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .log
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
