use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        batch::{self, BatchStatus},
        hold_record,
        hold_record::Entity as HoldRecordEntity,
        inventory,
        operation::{self, OperationStatus},
        order_line_item::{self, OrderLineStatus},
        process::{self, ProcessStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        audit::{AuditService, ChangeSet},
        inventory_state::InventoryState,
    },
};

/// Entity kinds a hold can be applied to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldEntityType {
    Operation,
    Process,
    OrderLine,
    Inventory,
    Batch,
}

impl HoldEntityType {
    /// Status the entity falls back to on release when no previous status
    /// was captured.
    pub fn default_release_status(self) -> String {
        match self {
            HoldEntityType::Operation => OperationStatus::Ready.to_string(),
            HoldEntityType::Process => ProcessStatus::Active.to_string(),
            HoldEntityType::OrderLine => OrderLineStatus::Created.to_string(),
            HoldEntityType::Inventory => "AVAILABLE".to_owned(),
            HoldEntityType::Batch => BatchStatus::Available.to_string(),
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            HoldEntityType::Operation => "operation",
            HoldEntityType::Process => "process",
            HoldEntityType::OrderLine => "order line item",
            HoldEntityType::Inventory => "inventory",
            HoldEntityType::Batch => "batch",
        }
    }
}

/// Returns true when an ACTIVE hold exists for (entity_type, entity_id).
pub async fn is_on_hold<C: ConnectionTrait>(
    conn: &C,
    entity_type: HoldEntityType,
    entity_id: Uuid,
) -> Result<bool, ServiceError> {
    let count = HoldRecordEntity::find()
        .filter(hold_record::Column::EntityType.eq(entity_type.to_string()))
        .filter(hold_record::Column::EntityId.eq(entity_id))
        .filter(hold_record::Column::Status.eq(hold_record::HoldStatus::Active.to_string()))
        .count(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(count > 0)
}

/// Reads the current status/state of the held entity.
async fn fetch_status<C: ConnectionTrait>(
    conn: &C,
    entity_type: HoldEntityType,
    entity_id: Uuid,
) -> Result<String, ServiceError> {
    let status = match entity_type {
        HoldEntityType::Operation => operation::Entity::find_by_id(entity_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|m| m.status),
        HoldEntityType::Process => process::Entity::find_by_id(entity_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|m| m.status),
        HoldEntityType::OrderLine => order_line_item::Entity::find_by_id(entity_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|m| m.status),
        HoldEntityType::Inventory => inventory::Entity::find_by_id(entity_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|m| m.state),
        HoldEntityType::Batch => batch::Entity::find_by_id(entity_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|m| m.status),
    };
    status.ok_or_else(|| {
        ServiceError::NotFound(format!(
            "{} {} not found",
            entity_type.display_name(),
            entity_id
        ))
    })
}

/// A hold forces ON_HOLD out of band, but terminal inventory and batches
/// stay immutable: once CONSUMED or SCRAPPED, nothing moves them again.
fn ensure_holdable(
    entity_type: HoldEntityType,
    entity_id: Uuid,
    current: &str,
) -> Result<(), ServiceError> {
    match entity_type {
        HoldEntityType::Inventory => {
            let state = InventoryState::parse(current, entity_id)?;
            if state.is_terminal() {
                return Err(ServiceError::InvalidTransition {
                    entity_id,
                    from: current.to_owned(),
                    to: InventoryState::OnHold.to_string(),
                });
            }
        }
        HoldEntityType::Batch => {
            let status: BatchStatus = current.parse().map_err(|_| {
                ServiceError::InternalError(format!(
                    "batch {} has unrecognized status '{}'",
                    entity_id, current
                ))
            })?;
            if matches!(status, BatchStatus::Consumed | BatchStatus::Scrapped) {
                return Err(ServiceError::InvalidTransition {
                    entity_id,
                    from: current.to_owned(),
                    to: BatchStatus::OnHold.to_string(),
                });
            }
        }
        _ => {}
    }
    Ok(())
}

/// Writes the status/state of the held entity.
async fn set_status<C: ConnectionTrait>(
    conn: &C,
    entity_type: HoldEntityType,
    entity_id: Uuid,
    status: &str,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    match entity_type {
        HoldEntityType::Operation => {
            let model = operation::Entity::find_by_id(entity_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("operation", entity_id))?;
            let mut active: operation::ActiveModel = model.into();
            active.status = Set(status.to_owned());
            active.updated_at = Set(now);
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }
        HoldEntityType::Process => {
            let model = process::Entity::find_by_id(entity_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("process", entity_id))?;
            let mut active: process::ActiveModel = model.into();
            active.status = Set(status.to_owned());
            active.updated_at = Set(now);
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }
        HoldEntityType::OrderLine => {
            let model = order_line_item::Entity::find_by_id(entity_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("order line item", entity_id))?;
            let mut active: order_line_item::ActiveModel = model.into();
            active.status = Set(status.to_owned());
            active.updated_at = Set(now);
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }
        HoldEntityType::Inventory => {
            let model = inventory::Entity::find_by_id(entity_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("inventory", entity_id))?;
            let mut active: inventory::ActiveModel = model.into();
            active.state = Set(status.to_owned());
            active.updated_at = Set(now);
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }
        HoldEntityType::Batch => {
            let model = batch::Entity::find_by_id(entity_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("batch", entity_id))?;
            let mut active: batch::ActiveModel = model.into();
            active.status = Set(status.to_owned());
            active.updated_at = Set(now);
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }
    }
    Ok(())
}

/// Generic apply/release hold subsystem gating the validator and the
/// production orchestrator.
#[derive(Clone)]
pub struct HoldService {
    db: Arc<DatabaseConnection>,
    audit: AuditService,
    event_sender: Option<EventSender>,
}

impl HoldService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        audit: AuditService,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            audit,
            event_sender,
        }
    }

    /// Applies a hold, capturing the entity's current status and forcing the
    /// entity to ON_HOLD. Fails with Conflict when an ACTIVE hold exists.
    #[instrument(skip(self))]
    pub async fn apply_hold(
        &self,
        entity_type: HoldEntityType,
        entity_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<hold_record::Model, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "hold reason cannot be empty".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        if is_on_hold(&txn, entity_type, entity_id).await? {
            return Err(ServiceError::Conflict(format!(
                "{} {} already has an active hold",
                entity_type.display_name(),
                entity_id
            )));
        }

        let previous_status = fetch_status(&txn, entity_type, entity_id).await?;
        ensure_holdable(entity_type, entity_id, &previous_status)?;
        set_status(&txn, entity_type, entity_id, "ON_HOLD").await?;

        let now = Utc::now();
        let hold = hold_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            entity_type: Set(entity_type.to_string()),
            entity_id: Set(entity_id),
            reason: Set(reason.to_owned()),
            status: Set(hold_record::HoldStatus::Active.to_string()),
            previous_status: Set(Some(previous_status.clone())),
            applied_by: Set(actor.to_owned()),
            applied_at: Set(now),
            released_by: Set(None),
            released_at: Set(None),
            release_comments: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        metrics::counter!("mes_holds_applied_total", 1);
        info!(
            entity_type = %entity_type,
            %entity_id,
            hold_id = %hold.id,
            "hold applied"
        );

        self.audit
            .record_changes(
                &entity_type.to_string(),
                entity_id,
                "HOLD_APPLIED",
                actor,
                &ChangeSet::new().with("status", Some(&previous_status), Some("ON_HOLD")),
            )
            .await;

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::HoldApplied {
                    hold_id: hold.id,
                    entity_type: entity_type.to_string(),
                    entity_id,
                })
                .await;
        }

        Ok(hold)
    }

    /// Releases an ACTIVE hold and restores the entity to the status captured
    /// at apply time (type default only when none was captured).
    #[instrument(skip(self))]
    pub async fn release_hold(
        &self,
        hold_id: Uuid,
        release_comments: Option<&str>,
        actor: &str,
    ) -> Result<hold_record::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let hold = HoldRecordEntity::find_by_id(hold_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("hold", hold_id))?;

        if hold.status != hold_record::HoldStatus::Active.to_string() {
            return Err(ServiceError::InvalidOperation(format!(
                "hold {} is not active (status {})",
                hold_id, hold.status
            )));
        }

        let entity_type: HoldEntityType = hold.entity_type.parse().map_err(|_| {
            ServiceError::InternalError(format!(
                "hold {} has unrecognized entity type '{}'",
                hold_id, hold.entity_type
            ))
        })?;

        let restore_to = hold
            .previous_status
            .clone()
            .unwrap_or_else(|| entity_type.default_release_status());
        set_status(&txn, entity_type, hold.entity_id, &restore_to).await?;

        let entity_id = hold.entity_id;
        let mut active: hold_record::ActiveModel = hold.into();
        active.status = Set(hold_record::HoldStatus::Released.to_string());
        active.released_by = Set(Some(actor.to_owned()));
        active.released_at = Set(Some(Utc::now()));
        active.release_comments = Set(release_comments.map(str::to_owned));
        let released = active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        metrics::counter!("mes_holds_released_total", 1);
        info!(hold_id = %released.id, restored_to = %restore_to, "hold released");

        self.audit
            .record_changes(
                &entity_type.to_string(),
                entity_id,
                "HOLD_RELEASED",
                actor,
                &ChangeSet::new().with("status", Some("ON_HOLD"), Some(&restore_to)),
            )
            .await;

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::HoldReleased {
                    hold_id: released.id,
                    entity_type: entity_type.to_string(),
                    entity_id,
                })
                .await;
        }

        Ok(released)
    }

    /// Returns true when the entity currently carries an ACTIVE hold.
    pub async fn is_on_hold(
        &self,
        entity_type: HoldEntityType,
        entity_id: Uuid,
    ) -> Result<bool, ServiceError> {
        is_on_hold(&*self.db, entity_type, entity_id).await
    }
}
