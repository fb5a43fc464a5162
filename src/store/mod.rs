// Storage seam. All inventory state lives behind this trait so the engine
// runs identically against Postgres and the in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::hold::{CreateHoldData, Hold};
use crate::models::operation_log::{NewLogEntry, OperationLogEntry};
use crate::models::order::{CreateOrderData, Order, OrderItem, OrderStatus};
use crate::models::ticket::Ticket;
use crate::models::tier::{CreateTierData, TicketTier};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryInventoryStore;
pub use postgres::PgInventoryStore;

/// One line of a consumption request: what the payment covered.
#[derive(Debug, Clone, Copy)]
pub struct ConsumeItem {
    pub tier_id: Uuid,
    pub quantity: i32,
}

/// Outcome of a consumption, fresh or idempotently replayed.
#[derive(Debug, Clone)]
pub struct Consumption {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    /// True when the order was already paid and the original tickets were
    /// returned unchanged.
    pub duplicate: bool,
}

/// Best error for an order whose holds no longer cover a consumption:
/// point at a concrete lost hold when there is one.
pub(crate) fn lost_hold_error(holds: &[Hold], order_id: Uuid, tier_id: Option<Uuid>) -> EngineError {
    let lost = holds
        .iter()
        .filter(|h| tier_id.map_or(true, |t| h.tier_id == t))
        .find(|h| !h.is_active());
    match lost {
        Some(hold) => EngineError::HoldExpired { hold_id: hold.id },
        None => EngineError::ConsumptionFailed {
            order_id,
            reason: "order holds do not cover the requested items".to_string(),
        },
    }
}

/// Authoritative inventory state.
///
/// Every method is atomic on its own: concurrent callers are arbitrated by
/// the backend (conditional updates in Postgres, one lock in memory), never
/// by state cached in process memory. Status transitions are compare-and-
/// swap; a `false` return means another caller got there first.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    // --- Tier ledger ---

    async fn create_tier(&self, data: CreateTierData) -> Result<TicketTier>;

    async fn tier(&self, tier_id: Uuid) -> Result<Option<TicketTier>>;

    async fn tiers_for_event(&self, event_id: Uuid) -> Result<Vec<TicketTier>>;

    /// Logically closes every open tier of the event. Returns how many
    /// tiers were closed. Closed tiers refuse new holds only.
    async fn close_tiers_for_event(&self, event_id: Uuid) -> Result<u64>;

    /// Applies `reserved_delta`/`sold_delta` to the tier, refusing any
    /// adjustment that would leave a count negative or push
    /// `reserved + sold` past `total`. A refused increase of
    /// `reserved_quantity` is `InsufficientInventory`.
    async fn adjust_quantities(
        &self,
        tier_id: Uuid,
        reserved_delta: i32,
        sold_delta: i32,
    ) -> Result<TicketTier>;

    /// Sum of quantities over the tier's active holds, for reconciliation
    /// against `reserved_quantity`.
    async fn active_hold_total(&self, tier_id: Uuid) -> Result<i64>;

    // --- Holds ---

    /// Atomically reserves inventory and records the hold: the guarded
    /// `reserved_quantity` increase, the hold row and the `hold_created`
    /// log entry commit together or not at all.
    async fn create_hold(&self, data: CreateHoldData) -> Result<Hold>;

    async fn hold(&self, hold_id: Uuid) -> Result<Option<Hold>>;

    async fn holds_for_order(&self, order_id: Uuid) -> Result<Vec<Hold>>;

    /// Compare-and-swap `active -> released`. The winner also returns the
    /// quantity to the tier, cancels the pending order and appends a
    /// `hold_released` entry, in the same transaction. Returns `false`
    /// when the hold was already terminal (idempotent no-op).
    async fn release_hold(&self, hold_id: Uuid, actor: &str) -> Result<bool>;

    /// Active holds with `expires_at < now`, oldest first, bounded by
    /// `limit`.
    async fn due_holds(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Hold>>;

    /// Compare-and-swap `active -> expired`. No quantity adjustment here;
    /// the sweeper adjusts per tier from the holds it actually claimed.
    async fn expire_hold(&self, hold_id: Uuid) -> Result<bool>;

    // --- Orders ---

    async fn create_order(&self, data: CreateOrderData) -> Result<Order>;

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>>;

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>>;

    /// Compare-and-swap the order status. Returns `false` if the order was
    /// not in `from`.
    async fn transition_order(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool>;

    // --- Consumption ---

    /// Converts the order's holds into tickets, all line items or none.
    ///
    /// In one transaction: an already-paid order short-circuits to its
    /// previously issued tickets (`duplicate: true`); otherwise every
    /// item's holds must still be active and cover the quantity, each is
    /// swapped to `consumed`, the tier moves the units from reserved to
    /// sold, one ticket is issued per unit, the order becomes `paid` and a
    /// `hold_consumed` entry is appended. Any failure rolls the whole
    /// conversion back.
    async fn consume_order(
        &self,
        order_id: Uuid,
        items: &[ConsumeItem],
        payment_ref: Option<&str>,
    ) -> Result<Consumption>;

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>>;

    // --- Operation log ---

    async fn append_log(&self, entry: NewLogEntry) -> Result<OperationLogEntry>;

    async fn recent_operations(&self, limit: i64) -> Result<Vec<OperationLogEntry>>;

    // --- Health ---

    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> Result<()>;
}
