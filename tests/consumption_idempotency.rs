use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::task::JoinSet;
use uuid::Uuid;

use boxoffice::error::EngineError;
use boxoffice::jobs::hold_expirer;
use boxoffice::models::hold::HoldStatus;
use boxoffice::models::operation_log::OperationType;
use boxoffice::models::order::OrderStatus;
use boxoffice::models::tier::{CreateTierData, TicketTier};
use boxoffice::services::consumption::{self, ConsumeRequest};
use boxoffice::services::hold_manager::{self, ReserveItem, ReserveRequest};
use boxoffice::store::{ConsumeItem, InMemoryInventoryStore, InventoryStore};

async fn seed_tier(store: &dyn InventoryStore, event_id: Uuid, total: i32) -> TicketTier {
    store
        .create_tier(CreateTierData {
            event_id,
            name: "Balcony".to_string(),
            price: Decimal::new(1800, 2),
            total_quantity: total,
        })
        .await
        .unwrap()
}

async fn reserve(
    store: &dyn InventoryStore,
    event_id: Uuid,
    tier_id: Uuid,
    quantity: i32,
    ttl: Duration,
) -> boxoffice::services::hold_manager::ReserveOutcome {
    hold_manager::reserve(
        store,
        ReserveRequest {
            event_id,
            items: vec![ReserveItem { tier_id, quantity }],
            owner: "alice".to_string(),
            checkout_session_id: "cs-alice".to_string(),
        },
        ttl,
    )
    .await
    .unwrap()
}

fn paid(order_id: Uuid, tier_id: Uuid, quantity: i32) -> ConsumeRequest {
    ConsumeRequest {
        order_id,
        items: vec![ConsumeItem { tier_id, quantity }],
        payment_ref: Some("pay_123".to_string()),
    }
}

#[tokio::test]
async fn consume_issues_tickets_and_settles_order() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;
    let outcome = reserve(&store, event_id, tier.id, 2, Duration::minutes(15)).await;

    let consumed = consumption::consume(&store, paid(outcome.order.id, tier.id, 2))
        .await
        .unwrap();

    assert!(!consumed.duplicate);
    assert_eq!(consumed.ticket_ids.len(), 2);
    assert_eq!(consumed.order.status, OrderStatus::Paid);
    assert_eq!(consumed.order.payment_ref.as_deref(), Some("pay_123"));

    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.reserved_quantity, 0);
    assert_eq!(tier.sold_quantity, 2);
    assert_eq!(tier.available(), 3);

    let hold = store.hold(outcome.holds[0].id).await.unwrap().unwrap();
    assert_eq!(hold.status, HoldStatus::Consumed);

    let tickets = store.tickets_for_order(outcome.order.id).await.unwrap();
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|t| t.owner == "alice"));
}

#[tokio::test]
async fn sold_out_tier_refuses_new_reservations() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 2).await;
    let outcome = reserve(&store, event_id, tier.id, 2, Duration::minutes(15)).await;

    consumption::consume(&store, paid(outcome.order.id, tier.id, 2))
        .await
        .unwrap();

    // Capacity is now sold, not merely reserved
    let tier_after = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier_after.sold_quantity, 2);
    assert_eq!(tier_after.reserved_quantity, 0);
    assert_eq!(tier_after.available(), 0);

    let result = hold_manager::reserve(
        &store,
        ReserveRequest {
            event_id,
            items: vec![ReserveItem {
                tier_id: tier.id,
                quantity: 1,
            }],
            owner: "bob".to_string(),
            checkout_session_id: "cs-bob".to_string(),
        },
        Duration::minutes(15),
    )
    .await;

    assert!(matches!(
        result,
        Err(EngineError::InsufficientInventory {
            requested: 1,
            available: 0,
            ..
        })
    ));
}

#[tokio::test]
async fn replayed_confirmation_returns_the_same_tickets() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;
    let outcome = reserve(&store, event_id, tier.id, 2, Duration::minutes(15)).await;

    let first = consumption::consume(&store, paid(outcome.order.id, tier.id, 2))
        .await
        .unwrap();
    let second = consumption::consume(&store, paid(outcome.order.id, tier.id, 2))
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.ticket_ids, second.ticket_ids);

    // Inventory moved exactly once
    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.sold_quantity, 2);
    assert_eq!(tier.reserved_quantity, 0);
    assert_eq!(store.tickets_for_order(outcome.order.id).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirmations_issue_tickets_once() {
    let store: Arc<dyn InventoryStore> = Arc::new(InMemoryInventoryStore::new());
    let event_id = Uuid::new_v4();
    let tier = seed_tier(store.as_ref(), event_id, 5).await;
    let outcome = reserve(store.as_ref(), event_id, tier.id, 3, Duration::minutes(15)).await;
    let order_id = outcome.order.id;

    let mut tasks = JoinSet::new();
    for _ in 0..2 {
        let store = store.clone();
        let tier_id = tier.id;
        tasks.spawn(async move {
            consumption::consume(store.as_ref(), paid(order_id, tier_id, 3)).await
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.unwrap().unwrap());
    }

    // Both deliveries succeed and agree on the ticket set
    assert_eq!(results[0].ticket_ids, results[1].ticket_ids);
    assert_eq!(results.iter().filter(|r| !r.duplicate).count(), 1);
    assert_eq!(results.iter().filter(|r| r.duplicate).count(), 1);

    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.sold_quantity, 3);
    assert_eq!(store.tickets_for_order(order_id).await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_a_confirmation_settles_cleanly() {
    let store: Arc<dyn InventoryStore> = Arc::new(InMemoryInventoryStore::new());
    let event_id = Uuid::new_v4();
    let tier = seed_tier(store.as_ref(), event_id, 5).await;
    let outcome = reserve(store.as_ref(), event_id, tier.id, 2, Duration::minutes(15)).await;
    let order_id = outcome.order.id;
    let hold_id = outcome.holds[0].id;
    let tier_id = tier.id;

    let cancel_task = {
        let store = store.clone();
        tokio::spawn(async move { hold_manager::cancel_hold(store.as_ref(), hold_id).await })
    };
    let consume_task = {
        let store = store.clone();
        tokio::spawn(
            async move { consumption::consume(store.as_ref(), paid(order_id, tier_id, 2)).await },
        )
    };

    let canceled = cancel_task.await.unwrap();
    let consumed = consume_task.await.unwrap();

    // Whoever claims the hold first wins; the loser gets a business
    // answer, never an infrastructure error.
    match (canceled, consumed) {
        (Ok(false), Ok(outcome)) => {
            assert!(!outcome.duplicate);
            assert_eq!(outcome.ticket_ids.len(), 2);
            let tier = store.tier(tier_id).await.unwrap().unwrap();
            assert_eq!(tier.sold_quantity, 2);
            assert_eq!(tier.reserved_quantity, 0);
        }
        (Ok(true), Err(EngineError::ConsumptionFailed { .. })) => {
            let tier = store.tier(tier_id).await.unwrap().unwrap();
            assert_eq!(tier.sold_quantity, 0);
            assert_eq!(tier.reserved_quantity, 0);
            assert!(store.tickets_for_order(order_id).await.unwrap().is_empty());
        }
        (canceled, consumed) => panic!("unexpected race outcome: {canceled:?} / {consumed:?}"),
    }
}

#[tokio::test]
async fn mismatched_items_are_refused_and_recorded() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;
    let outcome = reserve(&store, event_id, tier.id, 2, Duration::minutes(15)).await;

    let result = consumption::consume(&store, paid(outcome.order.id, tier.id, 3)).await;
    assert!(matches!(
        result,
        Err(EngineError::ConsumptionFailed { .. })
    ));

    // Nothing moved: holds stay active, the order stays pending
    let hold = store.hold(outcome.holds[0].id).await.unwrap().unwrap();
    assert_eq!(hold.status, HoldStatus::Active);
    let order = store.order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.sold_quantity, 0);
    assert_eq!(tier.reserved_quantity, 2);

    // The refusal is in the audit log
    let entries = store.recent_operations(10).await.unwrap();
    assert_eq!(entries[0].operation, OperationType::ConsumptionFailed);
}

#[tokio::test]
async fn repeated_tier_lines_are_refused_without_moving_state() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;
    let outcome = reserve(&store, event_id, tier.id, 2, Duration::minutes(15)).await;

    // Straight to the store: the same tier listed twice demands more
    // units than its holds carry.
    let items = [
        ConsumeItem {
            tier_id: tier.id,
            quantity: 2,
        },
        ConsumeItem {
            tier_id: tier.id,
            quantity: 2,
        },
    ];
    let result = store.consume_order(outcome.order.id, &items, None).await;
    assert!(matches!(result, Err(EngineError::HoldExpired { .. })));

    // Nothing moved: the hold is still claimable and the counts are intact
    let hold = store.hold(outcome.holds[0].id).await.unwrap().unwrap();
    assert_eq!(hold.status, HoldStatus::Active);
    let order = store.order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.reserved_quantity, 2);
    assert_eq!(tier.sold_quantity, 0);
    assert!(store.tickets_for_order(outcome.order.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn consume_after_sweep_is_refused() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;
    let outcome = reserve(&store, event_id, tier.id, 2, Duration::seconds(-1)).await;

    let stats = hold_expirer::sweep_expired_holds(&store, Utc::now(), 100)
        .await
        .unwrap();
    assert_eq!(stats.holds_expired, 1);

    let result = consumption::consume(&store, paid(outcome.order.id, tier.id, 2)).await;
    assert!(matches!(result, Err(EngineError::HoldExpired { .. })));

    // No tickets were issued and the quantity went back to the pool
    assert!(store.tickets_for_order(outcome.order.id).await.unwrap().is_empty());
    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.sold_quantity, 0);
    assert_eq!(tier.reserved_quantity, 0);
    assert_eq!(tier.available(), 5);
}

#[tokio::test]
async fn overdue_but_unswept_holds_still_consume() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;
    let outcome = reserve(&store, event_id, tier.id, 2, Duration::seconds(-1)).await;

    // The sweep has not run yet, so the holds are overdue but active and
    // the payment still lands.
    let consumed = consumption::consume(&store, paid(outcome.order.id, tier.id, 2))
        .await
        .unwrap();
    assert_eq!(consumed.ticket_ids.len(), 2);

    // A later sweep finds nothing to claim
    let stats = hold_expirer::sweep_expired_holds(&store, Utc::now(), 100)
        .await
        .unwrap();
    assert_eq!(stats.holds_expired, 0);
    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.sold_quantity, 2);
}

#[tokio::test]
async fn consume_unknown_order_is_not_found() {
    let store = InMemoryInventoryStore::new();

    let result = consumption::consume(
        &store,
        ConsumeRequest {
            order_id: Uuid::new_v4(),
            items: vec![ConsumeItem {
                tier_id: Uuid::new_v4(),
                quantity: 1,
            }],
            payment_ref: None,
        },
    )
    .await;

    assert!(matches!(result, Err(EngineError::OrderNotFound(_))));
}

#[tokio::test]
async fn consume_canceled_order_is_refused() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;
    let outcome = reserve(&store, event_id, tier.id, 2, Duration::minutes(15)).await;

    hold_manager::cancel_hold(&store, outcome.holds[0].id)
        .await
        .unwrap();

    let result = consumption::consume(&store, paid(outcome.order.id, tier.id, 2)).await;
    assert!(matches!(
        result,
        Err(EngineError::ConsumptionFailed { .. })
    ));
    assert!(store.tickets_for_order(outcome.order.id).await.unwrap().is_empty());
}
