//! Inventory state transitions outside the confirmation path: quality
//! decisions, blocking, scrapping and reservations.

mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use mes_core::entities::{batch, inventory, inventory_movement};
use mes_core::errors::ServiceError;
use mes_core::services::inventory_control::ReceiveMaterialRequest;

fn receipt(quantity: rust_decimal::Decimal) -> ReceiveMaterialRequest {
    ReceiveMaterialRequest {
        material_id: Uuid::new_v4(),
        material_code: "EXC".to_owned(),
        material_name: "Excipient".to_owned(),
        material_type: "RM".to_owned(),
        quantity,
        unit: "KG".to_owned(),
        location: Some("WH-2".to_owned()),
        supplier_name: Some("Supplier".to_owned()),
        supplier_lot_number: None,
    }
}

#[tokio::test]
async fn receipt_creates_batch_inventory_and_movement() {
    let db = common::setup_db().await;
    let services = common::services(&db);

    let (received_batch, received_inventory) = services
        .inventory_control
        .receive_material(receipt(dec!(500)), "warehouse")
        .await
        .unwrap();

    assert_eq!(received_batch.status, "AVAILABLE");
    assert_eq!(received_batch.created_via, "RECEIPT");
    assert_eq!(received_inventory.state, "AVAILABLE");
    assert_eq!(received_inventory.quantity, dec!(500));
    assert_eq!(received_inventory.batch_id, Some(received_batch.id));

    let movements = inventory_movement::Entity::find()
        .filter(inventory_movement::Column::InventoryId.eq(received_inventory.id))
        .all(&*db)
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, "RECEIPT");
    assert_eq!(movements[0].actor, "warehouse");
}

#[tokio::test]
async fn receipt_rejects_nonpositive_quantity() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let result = services
        .inventory_control
        .receive_material(receipt(dec!(0)), "warehouse")
        .await;
    assert_matches!(result, Err(ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn quality_accept_releases_batch_and_inventory() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let pending = common::seed_batch(&db, "QP-A", dec!(100), "QUALITY_PENDING").await;
    let inv = common::seed_inventory(&db, dec!(100), "AVAILABLE", Some(pending.id)).await;

    let decided = services
        .inventory_control
        .decide_quality(pending.id, true, "qa")
        .await
        .unwrap();
    assert_eq!(decided.status, "AVAILABLE");
    assert_eq!(decided.quality_decided_by.as_deref(), Some("qa"));
    assert!(decided.quality_decided_at.is_some());

    let row = inventory::Entity::find_by_id(inv.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, "AVAILABLE");
}

#[tokio::test]
async fn quality_reject_blocks_batch_and_inventory() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let pending = common::seed_batch(&db, "QP-R", dec!(100), "QUALITY_PENDING").await;
    let inv = common::seed_inventory(&db, dec!(100), "AVAILABLE", Some(pending.id)).await;

    let decided = services
        .inventory_control
        .decide_quality(pending.id, false, "qa")
        .await
        .unwrap();
    assert_eq!(decided.status, "BLOCKED");

    let row = inventory::Entity::find_by_id(inv.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, "BLOCKED");
}

#[tokio::test]
async fn quality_decision_requires_pending_status() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let available = common::seed_batch(&db, "AV-1", dec!(100), "AVAILABLE").await;

    let result = services
        .inventory_control
        .decide_quality(available.id, true, "qa")
        .await;
    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn block_unblock_cycle() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(25), "AVAILABLE", None).await;

    let blocked = services
        .inventory_control
        .block(inv.id, "damaged packaging", "wh")
        .await
        .unwrap();
    assert_eq!(blocked.state, "BLOCKED");

    let unblocked = services.inventory_control.unblock(inv.id, "wh").await.unwrap();
    assert_eq!(unblocked.state, "AVAILABLE");
}

#[tokio::test]
async fn scrap_is_terminal() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(25), "BLOCKED", None).await;

    let scrapped = services
        .inventory_control
        .scrap(inv.id, "expired", "wh")
        .await
        .unwrap();
    assert_eq!(scrapped.state, "SCRAPPED");

    // Nothing moves a scrapped row again.
    let unblock = services.inventory_control.unblock(inv.id, "wh").await;
    assert_matches!(unblock, Err(ServiceError::InvalidTransition { .. }));
    let block = services.inventory_control.block(inv.id, "again", "wh").await;
    assert_matches!(block, Err(ServiceError::InvalidTransition { .. }));
}

#[tokio::test]
async fn available_inventory_cannot_be_scrapped_directly() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(25), "AVAILABLE", None).await;

    let result = services.inventory_control.scrap(inv.id, "why not", "wh").await;
    assert_matches!(result, Err(ServiceError::InvalidTransition { .. }));
}

#[tokio::test]
async fn reservation_round_trip() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(25), "AVAILABLE", None).await;
    let order_id = Uuid::new_v4();

    let reserved = services
        .inventory_control
        .reserve(inv.id, order_id, "planner")
        .await
        .unwrap();
    assert_eq!(reserved.state, "RESERVED");
    assert_eq!(reserved.reserved_for_order_id, Some(order_id));

    // A second reservation must not steal the row for another order.
    let again = services
        .inventory_control
        .reserve(inv.id, Uuid::new_v4(), "planner")
        .await;
    assert_matches!(again, Err(ServiceError::InvalidTransition { .. }));
    let still = inventory::Entity::find_by_id(inv.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still.reserved_for_order_id, Some(order_id));

    let released = services
        .inventory_control
        .release_reservation(inv.id, "planner")
        .await
        .unwrap();
    assert_eq!(released.state, "AVAILABLE");
    assert_eq!(released.reserved_for_order_id, None);
}

#[tokio::test]
async fn transitions_leave_a_movement_trail() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let inv = common::seed_inventory(&db, dec!(25), "AVAILABLE", None).await;

    services.inventory_control.block(inv.id, "hold area", "wh").await.unwrap();
    services.inventory_control.unblock(inv.id, "wh").await.unwrap();
    services.inventory_control.block(inv.id, "again", "wh").await.unwrap();
    services.inventory_control.scrap(inv.id, "expired", "wh").await.unwrap();

    let count = inventory_movement::Entity::find()
        .filter(inventory_movement::Column::InventoryId.eq(inv.id))
        .count(&*db)
        .await
        .unwrap();
    assert_eq!(count, 4);
}

#[tokio::test]
async fn rejected_batches_cascade_only_to_open_inventory() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let pending = common::seed_batch(&db, "QP-C", dec!(100), "QUALITY_PENDING").await;
    let open = common::seed_inventory(&db, dec!(60), "AVAILABLE", Some(pending.id)).await;
    let consumed = common::seed_inventory(&db, dec!(40), "CONSUMED", Some(pending.id)).await;

    services
        .inventory_control
        .decide_quality(pending.id, false, "qa")
        .await
        .unwrap();

    let open_row = inventory::Entity::find_by_id(open.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open_row.state, "BLOCKED");
    let consumed_row = inventory::Entity::find_by_id(consumed.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consumed_row.state, "CONSUMED");

    let decided = batch::Entity::find_by_id(pending.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decided.status, "BLOCKED");
}
