use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        batch::{self, BatchOrigin, BatchStatus, Entity as BatchEntity},
        inventory::{self, Entity as InventoryEntity},
        inventory_movement::{self, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        audit::{AuditService, ChangeSet},
        batch_numbers::BatchNumberService,
        inventory_state::{InventoryState, InventoryStateValidator},
    },
};

/// A raw-material receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveMaterialRequest {
    pub material_id: Uuid,
    pub material_code: String,
    pub material_name: String,
    /// RM, IM, FG or WIP
    pub material_type: String,
    pub quantity: Decimal,
    pub unit: String,
    pub location: Option<String>,
    pub supplier_name: Option<String>,
    pub supplier_lot_number: Option<String>,
}

/// Validated inventory and batch state transitions outside the confirmation
/// path: receipt, quality decisions, block/unblock/scrap and reservations.
#[derive(Clone)]
pub struct InventoryControlService {
    db: Arc<DatabaseConnection>,
    validator: InventoryStateValidator,
    batch_numbers: BatchNumberService,
    audit: AuditService,
    event_sender: Option<EventSender>,
}

impl InventoryControlService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        batch_numbers: BatchNumberService,
        audit: AuditService,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            validator: InventoryStateValidator::new(),
            batch_numbers,
            audit,
            event_sender,
        }
    }

    /// Receives material into stock: one batch (created via RECEIPT) plus one
    /// AVAILABLE inventory row and a RECEIPT movement.
    #[instrument(skip(self, request), fields(material = %request.material_code))]
    pub async fn receive_material(
        &self,
        request: ReceiveMaterialRequest,
        actor: &str,
    ) -> Result<(batch::Model, inventory::Model), ServiceError> {
        if request.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidInput(format!(
                "receipt quantity must be positive, got {}",
                request.quantity
            )));
        }

        // Number generation transacts on its own; keep it outside the
        // receipt transaction so the two never nest on one pooled connection.
        let batch_number = self
            .batch_numbers
            .generate_receipt(
                Some(request.material_id),
                &request.material_code,
                Utc::now().date_naive(),
                request.supplier_lot_number.as_deref(),
            )
            .await?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let now = Utc::now();
        let new_batch = batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            batch_number: Set(batch_number),
            material_id: Set(request.material_id),
            material_name: Set(request.material_name.clone()),
            quantity: Set(request.quantity),
            unit: Set(request.unit.clone()),
            status: Set(BatchStatus::Available.to_string()),
            generated_at_operation_id: Set(None),
            created_via: Set(BatchOrigin::Receipt.to_string()),
            supplier_name: Set(request.supplier_name.clone()),
            supplier_lot_number: Set(request.supplier_lot_number.clone()),
            quality_decided_by: Set(None),
            quality_decided_at: Set(None),
            created_by: Set(actor.to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        let new_inventory = inventory::ActiveModel {
            id: Set(Uuid::new_v4()),
            material_id: Set(request.material_id),
            material_name: Set(request.material_name.clone()),
            material_type: Set(request.material_type.clone()),
            quantity: Set(request.quantity),
            unit: Set(request.unit.clone()),
            state: Set(InventoryState::Available.to_string()),
            location: Set(request.location.clone()),
            batch_id: Set(Some(new_batch.id)),
            reserved_for_order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        inventory_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            inventory_id: Set(new_inventory.id),
            batch_id: Set(Some(new_batch.id)),
            movement_type: Set(MovementType::Receipt.to_string()),
            quantity: Set(request.quantity),
            unit: Set(request.unit.clone()),
            operation_id: Set(None),
            confirmation_id: Set(None),
            actor: Set(actor.to_owned()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        metrics::counter!("mes_material_receipts_total", 1);
        info!(batch = %new_batch.batch_number, "material received");

        self.audit
            .record(
                "BATCH",
                new_batch.id,
                "MATERIAL_RECEIVED",
                None,
                None,
                Some(&new_batch.batch_number),
                actor,
            )
            .await;
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::InventoryReceived {
                    inventory_id: new_inventory.id,
                    batch_id: new_batch.id,
                    quantity: request.quantity,
                })
                .await;
        }

        Ok((new_batch, new_inventory))
    }

    /// Applies the ACCEPT/REJECT quality disposition to a QUALITY_PENDING
    /// batch. Accept releases it (and its inventory) to AVAILABLE; reject
    /// blocks both.
    #[instrument(skip(self))]
    pub async fn decide_quality(
        &self,
        batch_id: Uuid,
        accept: bool,
        actor: &str,
    ) -> Result<batch::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let target = BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("batch", batch_id))?;
        if target.status != BatchStatus::QualityPending.to_string() {
            return Err(ServiceError::InvalidOperation(format!(
                "batch {} is not pending a quality decision (status {})",
                target.batch_number, target.status
            )));
        }

        let new_status = if accept {
            BatchStatus::Available
        } else {
            BatchStatus::Blocked
        };
        let new_inventory_state = if accept {
            InventoryState::Available
        } else {
            InventoryState::Blocked
        };

        let now = Utc::now();
        let previous_status = target.status.clone();
        let mut active: batch::ActiveModel = target.into();
        active.status = Set(new_status.to_string());
        active.quality_decided_by = Set(Some(actor.to_owned()));
        active.quality_decided_at = Set(Some(now));
        active.updated_at = Set(now);
        let decided = active.update(&txn).await.map_err(ServiceError::db_error)?;

        let rows = InventoryEntity::find()
            .filter(inventory::Column::BatchId.eq(batch_id))
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        for row in rows {
            let current = InventoryState::parse(&row.state, row.id)?;
            if current.is_terminal() {
                continue;
            }
            let mut row_active: inventory::ActiveModel = row.into();
            row_active.state = Set(new_inventory_state.to_string());
            row_active.updated_at = Set(now);
            row_active.update(&txn).await.map_err(ServiceError::db_error)?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        self.audit
            .record_changes(
                "BATCH",
                batch_id,
                "QUALITY_DECIDED",
                actor,
                &ChangeSet::new().with(
                    "status",
                    Some(&previous_status),
                    Some(&new_status.to_string()),
                ),
            )
            .await;
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::BatchQualityDecided {
                    batch_id,
                    accepted: accept,
                })
                .await;
        }

        Ok(decided)
    }

    pub async fn block(
        &self,
        inventory_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<inventory::Model, ServiceError> {
        self.transition(
            inventory_id,
            InventoryState::Blocked,
            MovementType::Block,
            Some(reason),
            actor,
        )
        .await
    }

    pub async fn unblock(&self, inventory_id: Uuid, actor: &str) -> Result<inventory::Model, ServiceError> {
        self.transition(
            inventory_id,
            InventoryState::Available,
            MovementType::Unblock,
            None,
            actor,
        )
        .await
    }

    pub async fn scrap(
        &self,
        inventory_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<inventory::Model, ServiceError> {
        self.transition(
            inventory_id,
            InventoryState::Scrapped,
            MovementType::Scrap,
            Some(reason),
            actor,
        )
        .await
    }

    /// Reserves a row for an order; consumption by any other order fails.
    pub async fn reserve(
        &self,
        inventory_id: Uuid,
        order_id: Uuid,
        actor: &str,
    ) -> Result<inventory::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let inv = self.load(&txn, inventory_id).await?;
        self.validator.validate_reserve(&txn, &inv).await?;
        let previous_state = inv.state.clone();
        let mut active: inventory::ActiveModel = inv.into();
        active.state = Set(InventoryState::Reserved.to_string());
        active.reserved_for_order_id = Set(Some(order_id));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        self.record_movement(&txn, &updated, MovementType::Reserve, actor)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        self.finish_transition(&updated, &previous_state, "INVENTORY_RESERVED", None, actor)
            .await;
        Ok(updated)
    }

    pub async fn release_reservation(
        &self,
        inventory_id: Uuid,
        actor: &str,
    ) -> Result<inventory::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let inv = self.load(&txn, inventory_id).await?;
        self.validator.validate_release_reservation(&txn, &inv).await?;
        let previous_state = inv.state.clone();
        let mut active: inventory::ActiveModel = inv.into();
        active.state = Set(InventoryState::Available.to_string());
        active.reserved_for_order_id = Set(None);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        self.record_movement(&txn, &updated, MovementType::ReleaseReservation, actor)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        self.finish_transition(&updated, &previous_state, "RESERVATION_RELEASED", None, actor)
            .await;
        Ok(updated)
    }

    async fn transition(
        &self,
        inventory_id: Uuid,
        target: InventoryState,
        movement: MovementType,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<inventory::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let inv = self.load(&txn, inventory_id).await?;
        match target {
            InventoryState::Blocked => self.validator.validate_block(&txn, &inv).await?,
            InventoryState::Available => self.validator.validate_unblock(&txn, &inv).await?,
            InventoryState::Scrapped => self.validator.validate_scrap(&txn, &inv).await?,
            _ => {
                return Err(ServiceError::InvalidOperation(format!(
                    "unsupported direct transition to {}",
                    target
                )))
            }
        }
        let previous_state = inv.state.clone();
        let mut active: inventory::ActiveModel = inv.into();
        active.state = Set(target.to_string());
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        self.record_movement(&txn, &updated, movement, actor).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        self.finish_transition(&updated, &previous_state, "INVENTORY_STATE_CHANGED", reason, actor)
            .await;
        Ok(updated)
    }

    async fn load<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        inventory_id: Uuid,
    ) -> Result<inventory::Model, ServiceError> {
        InventoryEntity::find_by_id(inventory_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("inventory", inventory_id))
    }

    async fn record_movement<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        inv: &inventory::Model,
        movement: MovementType,
        actor: &str,
    ) -> Result<(), ServiceError> {
        inventory_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            inventory_id: Set(inv.id),
            batch_id: Set(inv.batch_id),
            movement_type: Set(movement.to_string()),
            quantity: Set(inv.quantity),
            unit: Set(inv.unit.clone()),
            operation_id: Set(None),
            confirmation_id: Set(None),
            actor: Set(actor.to_owned()),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;
        Ok(())
    }

    async fn finish_transition(
        &self,
        updated: &inventory::Model,
        previous_state: &str,
        action: &str,
        reason: Option<&str>,
        actor: &str,
    ) {
        let mut changes =
            ChangeSet::new().with("state", Some(previous_state), Some(&updated.state));
        if let Some(reason) = reason {
            changes.push("reason", None, Some(reason));
        }
        self.audit
            .record_changes("INVENTORY", updated.id, action, actor, &changes)
            .await;
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::InventoryStateChanged {
                    inventory_id: updated.id,
                    old_state: previous_state.to_owned(),
                    new_state: updated.state.clone(),
                })
                .await;
        }
    }
}
