//! Hold apply/release semantics across entity kinds.

mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uuid::Uuid;

use mes_core::entities::{batch, inventory};
use mes_core::errors::ServiceError;
use mes_core::services::holds::HoldEntityType;

#[tokio::test]
async fn apply_captures_previous_state_and_forces_on_hold() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(10), "RESERVED", None).await;

    let hold = services
        .holds
        .apply_hold(HoldEntityType::Inventory, inv.id, "contamination suspicion", "qa")
        .await
        .unwrap();

    assert_eq!(hold.status, "ACTIVE");
    assert_eq!(hold.previous_status.as_deref(), Some("RESERVED"));
    assert_eq!(hold.applied_by, "qa");

    let held = inventory::Entity::find_by_id(inv.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.state, "ON_HOLD");
    assert!(services
        .holds
        .is_on_hold(HoldEntityType::Inventory, inv.id)
        .await
        .unwrap());
}

#[tokio::test]
async fn release_restores_the_captured_state() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(10), "RESERVED", None).await;

    let hold = services
        .holds
        .apply_hold(HoldEntityType::Inventory, inv.id, "pending review", "qa")
        .await
        .unwrap();
    let released = services
        .holds
        .release_hold(hold.id, Some("review passed"), "qa-lead")
        .await
        .unwrap();

    assert_eq!(released.status, "RELEASED");
    assert_eq!(released.released_by.as_deref(), Some("qa-lead"));
    assert_eq!(released.release_comments.as_deref(), Some("review passed"));
    assert!(released.released_at.is_some());

    // Back to RESERVED, not the AVAILABLE type default.
    let restored = inventory::Entity::find_by_id(inv.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.state, "RESERVED");
    assert!(!services
        .holds
        .is_on_hold(HoldEntityType::Inventory, inv.id)
        .await
        .unwrap());
}

#[tokio::test]
async fn double_apply_conflicts() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let target = common::seed_batch(&db, "H-1", dec!(5), "AVAILABLE").await;

    services
        .holds
        .apply_hold(HoldEntityType::Batch, target.id, "first", "qa")
        .await
        .unwrap();
    let second = services
        .holds
        .apply_hold(HoldEntityType::Batch, target.id, "second", "qa")
        .await;
    assert_matches!(second, Err(ServiceError::Conflict(_)));

    let held = batch::Entity::find_by_id(target.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.status, "ON_HOLD");
}

#[tokio::test]
async fn reapply_after_release_is_allowed() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let target = common::seed_batch(&db, "H-2", dec!(5), "AVAILABLE").await;

    let first = services
        .holds
        .apply_hold(HoldEntityType::Batch, target.id, "first", "qa")
        .await
        .unwrap();
    services.holds.release_hold(first.id, None, "qa").await.unwrap();
    services
        .holds
        .apply_hold(HoldEntityType::Batch, target.id, "second", "qa")
        .await
        .unwrap();
}

#[tokio::test]
async fn releasing_a_released_hold_fails() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let target = common::seed_batch(&db, "H-3", dec!(5), "AVAILABLE").await;

    let hold = services
        .holds
        .apply_hold(HoldEntityType::Batch, target.id, "reason", "qa")
        .await
        .unwrap();
    services.holds.release_hold(hold.id, None, "qa").await.unwrap();
    let again = services.holds.release_hold(hold.id, None, "qa").await;
    assert_matches!(again, Err(ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn consumed_inventory_cannot_be_held() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(10), "CONSUMED", None).await;

    let result = services
        .holds
        .apply_hold(HoldEntityType::Inventory, inv.id, "too late", "qa")
        .await;
    assert_matches!(result, Err(ServiceError::InvalidTransition { .. }));

    // The terminal row is untouched.
    let row = inventory::Entity::find_by_id(inv.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, "CONSUMED");
    assert!(!services
        .holds
        .is_on_hold(HoldEntityType::Inventory, inv.id)
        .await
        .unwrap());
}

#[tokio::test]
async fn scrapped_batch_cannot_be_held() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let target = common::seed_batch(&db, "H-TERM", dec!(5), "SCRAPPED").await;

    let result = services
        .holds
        .apply_hold(HoldEntityType::Batch, target.id, "too late", "qa")
        .await;
    assert_matches!(result, Err(ServiceError::InvalidTransition { .. }));

    let row = batch::Entity::find_by_id(target.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "SCRAPPED");
}

#[tokio::test]
async fn empty_reason_is_rejected() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let result = services
        .holds
        .apply_hold(HoldEntityType::Batch, Uuid::new_v4(), "   ", "qa")
        .await;
    assert_matches!(result, Err(ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn missing_entity_is_not_found() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let result = services
        .holds
        .apply_hold(HoldEntityType::Operation, Uuid::new_v4(), "reason", "qa")
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn held_inventory_cannot_be_consumed_or_blocked() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(10), "AVAILABLE", None).await;

    services
        .holds
        .apply_hold(HoldEntityType::Inventory, inv.id, "quarantine", "qa")
        .await
        .unwrap();

    // ON_HOLD to BLOCKED is a legal transition, but the active hold gates it.
    let blocked = services.inventory_control.block(inv.id, "damage", "wh").await;
    assert_matches!(blocked, Err(ServiceError::InvalidOperation(_)));
}
