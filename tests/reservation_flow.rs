use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use boxoffice::error::EngineError;
use boxoffice::jobs::hold_expirer;
use boxoffice::models::hold::HoldStatus;
use boxoffice::models::order::OrderStatus;
use boxoffice::models::tier::{CreateTierData, TicketTier};
use boxoffice::services::hold_manager::{self, ReserveItem, ReserveRequest};
use boxoffice::store::{InMemoryInventoryStore, InventoryStore};

const TTL: i64 = 15;

async fn seed_tier(store: &dyn InventoryStore, event_id: Uuid, total: i32) -> TicketTier {
    store
        .create_tier(CreateTierData {
            event_id,
            name: "General admission".to_string(),
            price: Decimal::new(2500, 2),
            total_quantity: total,
        })
        .await
        .unwrap()
}

fn request(event_id: Uuid, tier_id: Uuid, quantity: i32, owner: &str) -> ReserveRequest {
    ReserveRequest {
        event_id,
        items: vec![ReserveItem { tier_id, quantity }],
        owner: owner.to_string(),
        checkout_session_id: format!("cs-{owner}"),
    }
}

#[tokio::test]
async fn reserve_places_hold_and_prices_order() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 10).await;

    let outcome = hold_manager::reserve(
        &store,
        request(event_id, tier.id, 3, "alice"),
        Duration::minutes(TTL),
    )
    .await
    .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Pending);
    assert_eq!(outcome.order.total_amount, Decimal::new(7500, 2));
    assert_eq!(outcome.holds.len(), 1);
    assert_eq!(outcome.holds[0].status, HoldStatus::Active);
    assert_eq!(outcome.holds[0].quantity, 3);
    assert!(outcome.holds[0].expires_at > Utc::now());

    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.reserved_quantity, 3);
    assert_eq!(tier.available(), 7);
}

#[tokio::test]
async fn reserve_across_tiers_is_all_or_nothing() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let plenty = seed_tier(&store, event_id, 10).await;
    let scarce = seed_tier(&store, event_id, 1).await;

    let result = hold_manager::reserve(
        &store,
        ReserveRequest {
            event_id,
            items: vec![
                ReserveItem {
                    tier_id: plenty.id,
                    quantity: 2,
                },
                ReserveItem {
                    tier_id: scarce.id,
                    quantity: 2,
                },
            ],
            owner: "alice".to_string(),
            checkout_session_id: "cs-alice".to_string(),
        },
        Duration::minutes(TTL),
    )
    .await;

    assert!(matches!(
        result,
        Err(EngineError::InsufficientInventory {
            requested: 2,
            available: 1,
            ..
        })
    ));

    // The hold on the first tier was unwound
    let plenty = store.tier(plenty.id).await.unwrap().unwrap();
    assert_eq!(plenty.reserved_quantity, 0);
    assert_eq!(store.active_hold_total(plenty.id).await.unwrap(), 0);
}

#[tokio::test]
async fn reserve_refuses_more_than_available() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 2).await;

    let result = hold_manager::reserve(
        &store,
        request(event_id, tier.id, 3, "alice"),
        Duration::minutes(TTL),
    )
    .await;

    match result {
        Err(EngineError::InsufficientInventory {
            tier_id,
            requested,
            available,
        }) => {
            assert_eq!(tier_id, tier.id);
            assert_eq!(requested, 3);
            assert_eq!(available, 2);
        }
        other => panic!("expected InsufficientInventory, got {other:?}"),
    }
}

#[tokio::test]
async fn reserve_unknown_tier_is_not_found() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();

    let result = hold_manager::reserve(
        &store,
        request(event_id, Uuid::new_v4(), 1, "alice"),
        Duration::minutes(TTL),
    )
    .await;

    assert!(matches!(result, Err(EngineError::TierNotFound(_))));
}

#[tokio::test]
async fn reserve_closed_tier_is_refused() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 10).await;

    assert_eq!(store.close_tiers_for_event(event_id).await.unwrap(), 1);

    let result = hold_manager::reserve(
        &store,
        request(event_id, tier.id, 1, "alice"),
        Duration::minutes(TTL),
    )
    .await;

    assert!(matches!(result, Err(EngineError::TierClosed(_))));
}

#[tokio::test]
async fn reserve_for_the_wrong_event_is_rejected() {
    let store = InMemoryInventoryStore::new();
    let tier = seed_tier(&store, Uuid::new_v4(), 10).await;

    let result = hold_manager::reserve(
        &store,
        request(Uuid::new_v4(), tier.id, 1, "alice"),
        Duration::minutes(TTL),
    )
    .await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn cancel_hold_returns_quantity_and_cancels_order() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;

    let outcome = hold_manager::reserve(
        &store,
        request(event_id, tier.id, 2, "alice"),
        Duration::minutes(TTL),
    )
    .await
    .unwrap();
    let hold_id = outcome.holds[0].id;

    assert!(hold_manager::cancel_hold(&store, hold_id).await.unwrap());

    let tier_after = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier_after.reserved_quantity, 0);
    assert_eq!(tier_after.available(), 5);

    let hold = store.hold(hold_id).await.unwrap().unwrap();
    assert_eq!(hold.status, HoldStatus::Released);

    let order = store.order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);

    // Second cancel reports nothing to release
    assert!(!hold_manager::cancel_hold(&store, hold_id).await.unwrap());
    let tier_after = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier_after.reserved_quantity, 0);
}

#[tokio::test]
async fn cancel_unknown_hold_is_not_found() {
    let store = InMemoryInventoryStore::new();

    let result = hold_manager::cancel_hold(&store, Uuid::new_v4()).await;

    assert!(matches!(result, Err(EngineError::HoldNotFound(_))));
}

#[tokio::test]
async fn last_tickets_free_up_through_expiry() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 2).await;

    // Alice grabs the last two tickets but never pays; her holds are
    // already past their deadline.
    hold_manager::reserve(
        &store,
        request(event_id, tier.id, 2, "alice"),
        Duration::seconds(-1),
    )
    .await
    .unwrap();

    // Bob is refused while the holds still exist
    let refused = hold_manager::reserve(
        &store,
        request(event_id, tier.id, 2, "bob"),
        Duration::minutes(TTL),
    )
    .await;
    assert!(matches!(
        refused,
        Err(EngineError::InsufficientInventory { available: 0, .. })
    ));

    // The sweep returns the quantity
    let stats = hold_expirer::sweep_expired_holds(&store, Utc::now(), 100)
        .await
        .unwrap();
    assert_eq!(stats.holds_expired, 1);
    assert_eq!(stats.quantity_released, 2);

    // Bob's retry succeeds
    let outcome = hold_manager::reserve(
        &store,
        request(event_id, tier.id, 2, "bob"),
        Duration::minutes(TTL),
    )
    .await
    .unwrap();
    assert_eq!(outcome.holds[0].quantity, 2);

    // Reserved count and active holds agree at every rest point
    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.reserved_quantity, 2);
    assert_eq!(store.active_hold_total(tier.id).await.unwrap(), 2);
}

#[tokio::test]
async fn closing_sales_keeps_existing_holds_releasable() {
    let store = InMemoryInventoryStore::new();
    let event_id = Uuid::new_v4();
    let tier = seed_tier(&store, event_id, 5).await;

    let outcome = hold_manager::reserve(
        &store,
        request(event_id, tier.id, 2, "alice"),
        Duration::minutes(TTL),
    )
    .await
    .unwrap();

    store.close_tiers_for_event(event_id).await.unwrap();

    // Closing refuses new holds but existing ones still release cleanly
    assert!(hold_manager::cancel_hold(&store, outcome.holds[0].id)
        .await
        .unwrap());
    let tier = store.tier(tier.id).await.unwrap().unwrap();
    assert_eq!(tier.reserved_quantity, 0);
}
