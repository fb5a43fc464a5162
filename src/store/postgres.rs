use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::hold::{CreateHoldData, Hold};
use crate::models::operation_log::{NewLogEntry, OperationLogEntry};
use crate::models::order::{CreateOrderData, Order, OrderItem, OrderStatus};
use crate::models::ticket::Ticket;
use crate::models::tier::{CreateTierData, TicketTier};

use super::{lost_hold_error, ConsumeItem, Consumption, InventoryStore};

/// Postgres backend. Conditional updates guard every count change and
/// status swap; multi-row contracts run in one transaction, so a failed
/// guard rolls back everything the operation touched.
#[derive(Debug, Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Why a guarded reservation did not go through.
    async fn reserve_refusal(&self, tier_id: Uuid, requested: i32) -> EngineError {
        match fetch_tier(&self.pool, tier_id).await {
            Err(err) => err,
            Ok(None) => EngineError::TierNotFound(tier_id),
            Ok(Some(tier)) if tier.is_closed() => EngineError::TierClosed(tier_id),
            Ok(Some(tier)) => EngineError::InsufficientInventory {
                tier_id,
                requested,
                available: tier.available(),
            },
        }
    }

    /// Why a guarded quantity adjustment did not go through.
    async fn adjust_refusal(&self, tier_id: Uuid, reserved_delta: i32, sold_delta: i32) -> EngineError {
        match fetch_tier(&self.pool, tier_id).await {
            Err(err) => err,
            Ok(None) => EngineError::TierNotFound(tier_id),
            Ok(Some(tier)) if reserved_delta > 0 => EngineError::InsufficientInventory {
                tier_id,
                requested: reserved_delta,
                available: tier.available(),
            },
            Ok(Some(_)) => EngineError::Validation(format!(
                "adjustment ({}, {}) violates invariants of tier {}",
                reserved_delta, sold_delta, tier_id
            )),
        }
    }
}

async fn fetch_tier<'e, E>(executor: E, tier_id: Uuid) -> Result<Option<TicketTier>>
where
    E: sqlx::PgExecutor<'e>,
{
    let tier = sqlx::query_as::<_, TicketTier>("SELECT * FROM ticket_tiers WHERE id = $1")
        .bind(tier_id)
        .fetch_optional(executor)
        .await?;
    Ok(tier)
}

/// Guarded ledger adjustment. `None` means the guard refused it.
async fn adjust_tier<'e, E>(
    executor: E,
    tier_id: Uuid,
    reserved_delta: i32,
    sold_delta: i32,
) -> Result<Option<TicketTier>>
where
    E: sqlx::PgExecutor<'e>,
{
    let tier = sqlx::query_as::<_, TicketTier>(
        r#"
        UPDATE ticket_tiers
        SET reserved_quantity = reserved_quantity + $2,
            sold_quantity = sold_quantity + $3,
            updated_at = now()
        WHERE id = $1
          AND reserved_quantity + $2 >= 0
          AND sold_quantity + $3 >= 0
          AND reserved_quantity + $2 + sold_quantity + $3 <= total_quantity
        RETURNING *
        "#,
    )
    .bind(tier_id)
    .bind(reserved_delta)
    .bind(sold_delta)
    .fetch_optional(executor)
    .await?;
    Ok(tier)
}

async fn holds_by_order<'e, E>(executor: E, order_id: Uuid) -> Result<Vec<Hold>>
where
    E: sqlx::PgExecutor<'e>,
{
    let holds = sqlx::query_as::<_, Hold>(
        r#"
        SELECT * FROM holds
        WHERE order_id = $1
        ORDER BY created_at
        "#,
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;
    Ok(holds)
}

async fn tickets_by_order<'e, E>(executor: E, order_id: Uuid) -> Result<Vec<Ticket>>
where
    E: sqlx::PgExecutor<'e>,
{
    let tickets = sqlx::query_as::<_, Ticket>(
        r#"
        SELECT * FROM tickets
        WHERE order_id = $1
        ORDER BY issued_at, id
        "#,
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;
    Ok(tickets)
}

async fn insert_log<'e, E>(executor: E, entry: NewLogEntry) -> Result<OperationLogEntry>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, OperationLogEntry>(
        r#"
        INSERT INTO operation_log (operation, actor, metadata)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(entry.operation)
    .bind(&entry.actor)
    .bind(&entry.metadata)
    .fetch_one(executor)
    .await?;
    Ok(row)
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn create_tier(&self, data: CreateTierData) -> Result<TicketTier> {
        let tier = sqlx::query_as::<_, TicketTier>(
            r#"
            INSERT INTO ticket_tiers (event_id, name, price, total_quantity)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(data.event_id)
        .bind(&data.name)
        .bind(data.price)
        .bind(data.total_quantity)
        .fetch_one(&self.pool)
        .await?;
        Ok(tier)
    }

    async fn tier(&self, tier_id: Uuid) -> Result<Option<TicketTier>> {
        fetch_tier(&self.pool, tier_id).await
    }

    async fn tiers_for_event(&self, event_id: Uuid) -> Result<Vec<TicketTier>> {
        let tiers = sqlx::query_as::<_, TicketTier>(
            r#"
            SELECT * FROM ticket_tiers
            WHERE event_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tiers)
    }

    async fn close_tiers_for_event(&self, event_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ticket_tiers
            SET closed_at = now(), updated_at = now()
            WHERE event_id = $1 AND closed_at IS NULL
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn adjust_quantities(
        &self,
        tier_id: Uuid,
        reserved_delta: i32,
        sold_delta: i32,
    ) -> Result<TicketTier> {
        match adjust_tier(&self.pool, tier_id, reserved_delta, sold_delta).await? {
            Some(tier) => Ok(tier),
            None => Err(self.adjust_refusal(tier_id, reserved_delta, sold_delta).await),
        }
    }

    async fn active_hold_total(&self, tier_id: Uuid) -> Result<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(quantity), 0) FROM holds
            WHERE tier_id = $1 AND status = 'active'
            "#,
        )
        .bind(tier_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn create_hold(&self, data: CreateHoldData) -> Result<Hold> {
        if data.quantity <= 0 {
            return Err(EngineError::Validation(
                "hold quantity must be positive".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        // The oversell gate. Loses exactly when the remaining pool is
        // smaller than the request, the tier is closed, or it is gone.
        let adjusted = sqlx::query_as::<_, TicketTier>(
            r#"
            UPDATE ticket_tiers
            SET reserved_quantity = reserved_quantity + $2, updated_at = now()
            WHERE id = $1
              AND closed_at IS NULL
              AND total_quantity - reserved_quantity - sold_quantity >= $2
            RETURNING *
            "#,
        )
        .bind(data.tier_id)
        .bind(data.quantity)
        .fetch_optional(&mut *tx)
        .await?;

        if adjusted.is_none() {
            tx.rollback().await?;
            tracing::debug!(
                tier_id = %data.tier_id,
                requested = data.quantity,
                "reservation guard refused"
            );
            return Err(self.reserve_refusal(data.tier_id, data.quantity).await);
        }

        let order_exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                .bind(data.order_id)
                .fetch_one(&mut *tx)
                .await?;
        if !order_exists {
            tx.rollback().await?;
            return Err(EngineError::OrderNotFound(data.order_id));
        }

        let hold = sqlx::query_as::<_, Hold>(
            r#"
            INSERT INTO holds (
                tier_id, order_id, quantity, owner,
                checkout_session_id, status, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, 'active', $6)
            RETURNING *
            "#,
        )
        .bind(data.tier_id)
        .bind(data.order_id)
        .bind(data.quantity)
        .bind(&data.owner)
        .bind(&data.checkout_session_id)
        .bind(data.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        insert_log(
            &mut *tx,
            NewLogEntry::hold_created(
                hold.id,
                hold.order_id,
                hold.tier_id,
                hold.quantity,
                &hold.owner,
                hold.expires_at,
            ),
        )
        .await?;

        tx.commit().await?;
        Ok(hold)
    }

    async fn hold(&self, hold_id: Uuid) -> Result<Option<Hold>> {
        let hold = sqlx::query_as::<_, Hold>("SELECT * FROM holds WHERE id = $1")
            .bind(hold_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hold)
    }

    async fn holds_for_order(&self, order_id: Uuid) -> Result<Vec<Hold>> {
        holds_by_order(&self.pool, order_id).await
    }

    async fn release_hold(&self, hold_id: Uuid, actor: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Lock the hold's order before the hold itself; consume_order
        // acquires order, hold and tier locks in that same sequence.
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM orders
            WHERE id = (SELECT order_id FROM holds WHERE id = $1)
            FOR UPDATE
            "#,
        )
        .bind(hold_id)
        .fetch_optional(&mut *tx)
        .await?;

        let hold = sqlx::query_as::<_, Hold>(
            r#"
            UPDATE holds
            SET status = 'released', updated_at = now()
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(hold_id)
        .fetch_optional(&mut *tx)
        .await?;

        let hold = match hold {
            Some(hold) => hold,
            None => {
                tx.rollback().await?;
                // Missing hold or an idempotent repeat on a terminal one.
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM holds WHERE id = $1)",
                )
                .bind(hold_id)
                .fetch_one(&self.pool)
                .await?;
                if exists {
                    return Ok(false);
                }
                return Err(EngineError::HoldNotFound(hold_id));
            }
        };

        if adjust_tier(&mut *tx, hold.tier_id, -hold.quantity, 0)
            .await?
            .is_none()
        {
            tx.rollback().await?;
            return Err(EngineError::Validation(format!(
                "releasing hold {} would corrupt counts of tier {}",
                hold.id, hold.tier_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'canceled', updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(hold.order_id)
        .execute(&mut *tx)
        .await?;

        insert_log(
            &mut *tx,
            NewLogEntry::hold_released(hold.id, hold.order_id, hold.tier_id, hold.quantity, actor),
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn due_holds(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Hold>> {
        let holds = sqlx::query_as::<_, Hold>(
            r#"
            SELECT * FROM holds
            WHERE status = 'active' AND expires_at < $1
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(holds)
    }

    async fn expire_hold(&self, hold_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE holds
            SET status = 'expired', updated_at = now()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(hold_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_order(&self, data: CreateOrderData) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (
                event_id, owner, checkout_session_id, total_amount, status
            )
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING *
            "#,
        )
        .bind(data.event_id)
        .bind(&data.owner)
        .bind(&data.checkout_session_id)
        .bind(data.total_amount)
        .fetch_one(&mut *tx)
        .await?;

        for item in &data.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, tier_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(order.id)
            .bind(item.tier_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order)
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT * FROM order_items
            WHERE order_id = $1
            ORDER BY tier_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn consume_order(
        &self,
        order_id: Uuid,
        items: &[ConsumeItem],
        payment_ref: Option<&str>,
    ) -> Result<Consumption> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent webhook deliveries for the same order.
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        match order.status {
            OrderStatus::Paid => {
                let tickets = tickets_by_order(&mut *tx, order_id).await?;
                tx.commit().await?;
                return Ok(Consumption {
                    order,
                    tickets,
                    duplicate: true,
                });
            }
            OrderStatus::Failed => {
                let holds = holds_by_order(&mut *tx, order_id).await?;
                tx.rollback().await?;
                return Err(lost_hold_error(&holds, order_id, None));
            }
            OrderStatus::Canceled => {
                tx.rollback().await?;
                return Err(EngineError::ConsumptionFailed {
                    order_id,
                    reason: "order was canceled".to_string(),
                });
            }
            OrderStatus::Pending => {}
        }

        let holds = holds_by_order(&mut *tx, order_id).await?;

        let mut consumed_ids: Vec<Uuid> = Vec::new();
        let mut tickets: Vec<Ticket> = Vec::new();
        for item in items {
            let active: Vec<&Hold> = holds
                .iter()
                .filter(|h| h.tier_id == item.tier_id && h.is_active())
                .collect();
            let covered: i32 = active.iter().map(|h| h.quantity).sum();
            if covered < item.quantity {
                tx.rollback().await?;
                return Err(lost_hold_error(&holds, order_id, Some(item.tier_id)));
            }

            // Claim each hold. Losing a swap here means a sweeper fired
            // between our read and this statement.
            let mut transitioned = 0i32;
            for hold in active {
                let result = sqlx::query(
                    r#"
                    UPDATE holds
                    SET status = 'consumed', updated_at = now()
                    WHERE id = $1 AND status = 'active'
                    "#,
                )
                .bind(hold.id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    tx.rollback().await?;
                    tracing::debug!(hold_id = %hold.id, "hold lost to a concurrent transition");
                    return Err(EngineError::HoldExpired { hold_id: hold.id });
                }
                transitioned += hold.quantity;
                consumed_ids.push(hold.id);
            }

            if adjust_tier(&mut *tx, item.tier_id, -transitioned, item.quantity)
                .await?
                .is_none()
            {
                tx.rollback().await?;
                return Err(EngineError::Validation(format!(
                    "consuming order {} would corrupt counts of tier {}",
                    order_id, item.tier_id
                )));
            }

            for _ in 0..item.quantity {
                let ticket = sqlx::query_as::<_, Ticket>(
                    r#"
                    INSERT INTO tickets (order_id, tier_id, event_id, owner)
                    VALUES ($1, $2, $3, $4)
                    RETURNING *
                    "#,
                )
                .bind(order_id)
                .bind(item.tier_id)
                .bind(order.event_id)
                .bind(&order.owner)
                .fetch_one(&mut *tx)
                .await?;
                tickets.push(ticket);
            }
        }

        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = 'paid', payment_ref = $2, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(payment_ref)
        .fetch_one(&mut *tx)
        .await?;

        insert_log(
            &mut *tx,
            NewLogEntry::hold_consumed(order_id, &consumed_ids, tickets.len()),
        )
        .await?;

        tx.commit().await?;

        Ok(Consumption {
            order,
            tickets,
            duplicate: false,
        })
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>> {
        tickets_by_order(&self.pool, order_id).await
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<OperationLogEntry> {
        insert_log(&self.pool, entry).await
    }

    async fn recent_operations(&self, limit: i64) -> Result<Vec<OperationLogEntry>> {
        let entries = sqlx::query_as::<_, OperationLogEntry>(
            r#"
            SELECT * FROM operation_log
            ORDER BY occurred_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
