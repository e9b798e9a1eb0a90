use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DbBackend, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        batch::{self, BatchOrigin, BatchStatus, Entity as BatchEntity},
        batch_relation::{self, RelationType},
        inventory::{self, Entity as InventoryEntity, MaterialType},
        inventory_movement::{self, MovementType},
        operation::{self, Entity as OperationEntity, OperationStatus},
        order_line_item::{self, Entity as OrderLineItemEntity},
        process::{Entity as ProcessEntity, ProcessStatus},
        process_parameter_config::{self, Entity as ProcessParameterConfigEntity},
        production_confirmation::{self, ConfirmationStatus, Entity as ProductionConfirmationEntity},
        routing_step::{self, Entity as RoutingStepEntity, RoutingStepStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        audit::{AuditService, ChangeSet},
        batch_numbers::BatchNumberService,
        batch_sizing::BatchSizeService,
        holds::{self, HoldEntityType},
        inventory_state::{InventoryState, InventoryStateValidator},
        routing::RoutingService,
    },
};

/// Fraction of the configured min/max range treated as "near limit" for
/// parameter warnings.
const NEAR_LIMIT_FRACTION: &str = "0.05";

/// One declared material consumption line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialConsumption {
    pub inventory_id: Uuid,
    pub quantity: Decimal,
}

/// One submitted process parameter value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: Decimal,
}

/// A production confirmation call.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmProductionRequest {
    pub operation_id: Uuid,
    pub produced_quantity: Decimal,
    #[serde(default)]
    pub scrap_quantity: Decimal,
    /// Explicitly save as a partial confirmation even when quantities would
    /// complete the operation.
    #[serde(default)]
    pub save_as_partial: bool,
    #[serde(default)]
    pub consumptions: Vec<MaterialConsumption>,
    #[serde(default)]
    pub parameters: Vec<ParameterValue>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub delay_reason: Option<String>,
    pub equipment_id: Option<Uuid>,
    pub equipment_type: Option<String>,
    pub operator_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumedMaterialSummary {
    pub inventory_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub material_id: Uuid,
    pub material_name: String,
    pub quantity: Decimal,
    pub unit: String,
}

/// What one consumption line actually changed, carried out of the
/// transaction so the audit trail can mirror it after commit.
struct ConsumptionOutcome {
    summary: ConsumedMaterialSummary,
    previous_state: InventoryState,
    previous_quantity: Decimal,
    remaining_quantity: Decimal,
    fully_consumed: bool,
    /// Owning batch flipped to CONSUMED, with its previous status.
    batch_consumed: Option<(Uuid, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputBatchSummary {
    pub batch_id: Uuid,
    pub batch_number: String,
    pub inventory_id: Uuid,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextOperationSummary {
    pub operation_id: Uuid,
    pub name: String,
    pub sequence_number: i32,
}

/// Full result of one confirmation, including every output batch.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmProductionResponse {
    pub confirmation_id: Uuid,
    pub status: String,
    pub is_partial: bool,
    pub confirmed_quantity: Decimal,
    pub target_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub materials_consumed: Vec<ConsumedMaterialSummary>,
    pub output_batches: Vec<OutputBatchSummary>,
    pub batch_count: usize,
    pub has_partial_batch: bool,
    pub warnings: Vec<String>,
    pub next_operations: Vec<NextOperationSummary>,
    pub routing_completed: bool,
}

/// The production confirmation orchestrator.
///
/// One confirmation call runs admission, parameter validation, consumption,
/// output planning and generation, accounting, and routing progression inside
/// a single transaction; any failure before commit leaves no partial writes.
#[derive(Clone)]
pub struct ProductionService {
    db: Arc<DatabaseConnection>,
    validator: InventoryStateValidator,
    batch_numbers: BatchNumberService,
    batch_sizing: BatchSizeService,
    routing: RoutingService,
    audit: AuditService,
    event_sender: Option<EventSender>,
}

impl ProductionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        batch_numbers: BatchNumberService,
        batch_sizing: BatchSizeService,
        routing: RoutingService,
        audit: AuditService,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            validator: InventoryStateValidator::new(),
            batch_numbers,
            batch_sizing,
            routing,
            audit,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(operation_id = %request.operation_id))]
    pub async fn confirm_production(
        &self,
        request: ConfirmProductionRequest,
        actor: &str,
    ) -> Result<ConfirmProductionResponse, ServiceError> {
        validate_request(&request)?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        // Admission
        let op = self.load_operation_for_update(&txn, request.operation_id).await?;
        let op_status: OperationStatus = op.status.parse().map_err(|_| {
            ServiceError::InternalError(format!(
                "operation {} has unrecognized status '{}'",
                op.id, op.status
            ))
        })?;
        if !matches!(op_status, OperationStatus::Ready | OperationStatus::InProgress) {
            return Err(ServiceError::InvalidOperation(format!(
                "operation {} is not confirmable in status {}",
                op.id, op.status
            )));
        }
        if holds::is_on_hold(&txn, HoldEntityType::Operation, op.id).await? {
            return Err(ServiceError::InvalidOperation(format!(
                "operation {} has an active hold",
                op.id
            )));
        }
        let proc = ProcessEntity::find_by_id(op.process_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("process", op.process_id))?;
        if holds::is_on_hold(&txn, HoldEntityType::Process, proc.id).await? {
            return Err(ServiceError::InvalidOperation(format!(
                "process {} has an active hold",
                proc.id
            )));
        }
        if proc.status != ProcessStatus::Active.to_string() {
            return Err(ServiceError::InvalidOperation(format!(
                "process {} is not executable in status {}",
                proc.id, proc.status
            )));
        }
        let line_item = OrderLineItemEntity::find_by_id(op.order_line_item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("order line item", op.order_line_item_id))?;

        // Parameter validation
        let warnings =
            validate_parameters(&txn, &op, &line_item.product_sku, &request.parameters).await?;

        // Confirmation accounting, checked before any write so quantity
        // violations abort with nothing touched.
        let previous_confirmed = op.confirmed_quantity;
        let new_confirmed = previous_confirmed + request.produced_quantity;
        if new_confirmed > op.target_quantity {
            return Err(ServiceError::ValidationError(format!(
                "confirmed quantity {} would exceed target {} for operation {}",
                new_confirmed, op.target_quantity, op.id
            )));
        }
        let is_partial = request.save_as_partial || new_confirmed < op.target_quantity;
        let status = if is_partial {
            ConfirmationStatus::PartiallyConfirmed
        } else {
            ConfirmationStatus::Confirmed
        };

        let confirmation_id = Uuid::new_v4();
        let now = Utc::now();

        // Consumption
        let mut consumptions = Vec::with_capacity(request.consumptions.len());
        for line in &request.consumptions {
            let outcome = self
                .consume_line(&txn, line, &op, line_item.order_id, confirmation_id, actor)
                .await?;
            consumptions.push(outcome);
        }
        let materials_consumed: Vec<ConsumedMaterialSummary> =
            consumptions.iter().map(|c| c.summary.clone()).collect();

        // Output planning and generation
        let mut output_batches = Vec::new();
        let mut has_partial_batch = false;
        let mut batch_count = 0;
        if op.produces_output_batch {
            let plan = self
                .batch_sizing
                .plan_in(
                    &txn,
                    request.produced_quantity,
                    &op.operation_type,
                    Some(line_item.product_material_id),
                    Some(&line_item.product_sku),
                    request.equipment_type.as_deref(),
                )
                .await?;
            has_partial_batch = plan.has_partial_batch;
            batch_count = plan.batch_count;
            for size in &plan.batch_sizes {
                let output = self
                    .create_output_batch(
                        &txn,
                        &op,
                        &line_item,
                        *size,
                        &materials_consumed,
                        confirmation_id,
                        actor,
                    )
                    .await?;
                output_batches.push(output);
            }
        }

        // Persist the confirmation record with raw snapshots.
        production_confirmation::ActiveModel {
            id: Set(confirmation_id),
            operation_id: Set(op.id),
            order_line_item_id: Set(line_item.id),
            produced_quantity: Set(request.produced_quantity),
            scrap_quantity: Set(request.scrap_quantity),
            unit: Set(op.unit.clone()),
            status: Set(status.to_string()),
            started_at: Set(request.started_at),
            finished_at: Set(request.finished_at),
            delay_reason: Set(request.delay_reason.clone()),
            equipment_id: Set(request.equipment_id),
            operator_id: Set(request.operator_id),
            consumed_materials: Set(Some(
                serde_json::to_value(&request.consumptions)
                    .map_err(|e| ServiceError::InternalError(e.to_string()))?,
            )),
            parameters: Set(Some(
                serde_json::to_value(&request.parameters)
                    .map_err(|e| ServiceError::InternalError(e.to_string()))?,
            )),
            rejection_reason: Set(None),
            rejected_by: Set(None),
            rejected_at: Set(None),
            created_by: Set(actor.to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        // Operation status and progression
        let previous_op_status = op.status.clone();
        let operation_id = op.id;
        let target_quantity = op.target_quantity;
        let mut next_operations = Vec::new();
        let mut routing_completed = false;
        let mut op_active: operation::ActiveModel = op.into();
        op_active.confirmed_quantity = Set(new_confirmed);
        op_active.updated_at = Set(now);
        if is_partial {
            op_active.status = Set(OperationStatus::InProgress.to_string());
            op_active.update(&txn).await.map_err(ServiceError::db_error)?;
            mark_step_in_progress(&txn, operation_id).await?;
        } else {
            op_active.status = Set(OperationStatus::Confirmed.to_string());
            op_active.update(&txn).await.map_err(ServiceError::db_error)?;
            let progression = self
                .routing
                .progress_to_next_operation_in(&txn, operation_id)
                .await?;
            routing_completed = progression.routing_completed;
            next_operations = progression
                .activated_operations
                .iter()
                .map(|op| NextOperationSummary {
                    operation_id: op.id,
                    name: op.name.clone(),
                    sequence_number: op.sequence_number,
                })
                .collect();
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        metrics::counter!("mes_production_confirmations_total", 1);
        info!(
            %confirmation_id,
            %operation_id,
            status = %status,
            batches = output_batches.len(),
            "production confirmed"
        );

        let new_op_status = if is_partial {
            OperationStatus::InProgress.to_string()
        } else {
            OperationStatus::Confirmed.to_string()
        };
        self.audit
            .record_changes(
                "OPERATION",
                operation_id,
                "PRODUCTION_CONFIRMED",
                actor,
                &ChangeSet::new()
                    .with("status", Some(&previous_op_status), Some(&new_op_status))
                    .with(
                        "confirmed_quantity",
                        Some(&previous_confirmed.to_string()),
                        Some(&new_confirmed.to_string()),
                    ),
            )
            .await;

        for consumed in &consumptions {
            let changes = if consumed.fully_consumed {
                ChangeSet::new().with(
                    "state",
                    Some(&consumed.previous_state.to_string()),
                    Some(&InventoryState::Consumed.to_string()),
                )
            } else {
                ChangeSet::new().with(
                    "quantity",
                    Some(&consumed.previous_quantity.to_string()),
                    Some(&consumed.remaining_quantity.to_string()),
                )
            };
            self.audit
                .record_changes(
                    "INVENTORY",
                    consumed.summary.inventory_id,
                    "MATERIAL_CONSUMED",
                    actor,
                    &changes,
                )
                .await;
            if let Some((batch_id, previous_status)) = &consumed.batch_consumed {
                self.audit
                    .record_changes(
                        "BATCH",
                        *batch_id,
                        "BATCH_CONSUMED",
                        actor,
                        &ChangeSet::new().with(
                            "status",
                            Some(previous_status),
                            Some(&BatchStatus::Consumed.to_string()),
                        ),
                    )
                    .await;
            }
        }

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::ProductionConfirmed {
                    confirmation_id,
                    operation_id,
                    order_line_item_id: line_item.id,
                    produced_quantity: request.produced_quantity,
                    status: status.to_string(),
                })
                .await;
            for consumed in &materials_consumed {
                sender
                    .send_or_log(Event::InventoryConsumed {
                        inventory_id: consumed.inventory_id,
                        operation_id,
                        quantity: consumed.quantity,
                    })
                    .await;
            }
            for output in &output_batches {
                sender
                    .send_or_log(Event::BatchCreated {
                        batch_id: output.batch_id,
                        batch_number: output.batch_number.clone(),
                        created_via: BatchOrigin::Production.to_string(),
                        quantity: output.quantity,
                    })
                    .await;
                for consumed in &materials_consumed {
                    let Some(parent_batch_id) = consumed.batch_id else {
                        continue;
                    };
                    sender
                        .send_or_log(Event::GenealogyLinked {
                            parent_batch_id,
                            child_batch_id: output.batch_id,
                            quantity_consumed: consumed.quantity,
                        })
                        .await;
                }
            }
            if !is_partial {
                sender
                    .send_or_log(Event::OperationConfirmed { operation_id })
                    .await;
                for next in &next_operations {
                    sender
                        .send_or_log(Event::OperationActivated {
                            operation_id: next.operation_id,
                            sequence_number: next.sequence_number,
                        })
                        .await;
                }
            }
        }

        Ok(ConfirmProductionResponse {
            confirmation_id,
            status: status.to_string(),
            is_partial,
            confirmed_quantity: new_confirmed,
            target_quantity,
            remaining_quantity: target_quantity - new_confirmed,
            materials_consumed,
            output_batches,
            batch_count,
            has_partial_batch,
            warnings,
            next_operations,
            routing_completed,
        })
    }

    /// Rejects a persisted confirmation. Terminal and idempotency-guarded:
    /// an already-rejected confirmation cannot be rejected again.
    #[instrument(skip(self))]
    pub async fn reject_confirmation(
        &self,
        confirmation_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<production_confirmation::Model, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "rejection reason cannot be empty".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let confirmation = ProductionConfirmationEntity::find_by_id(confirmation_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("production confirmation", confirmation_id))?;

        if confirmation.status == ConfirmationStatus::Rejected.to_string() {
            return Err(ServiceError::Conflict(format!(
                "production confirmation {} is already rejected",
                confirmation_id
            )));
        }

        let previous_status = confirmation.status.clone();
        let mut active: production_confirmation::ActiveModel = confirmation.into();
        active.status = Set(ConfirmationStatus::Rejected.to_string());
        active.rejection_reason = Set(Some(reason.to_owned()));
        active.rejected_by = Set(Some(actor.to_owned()));
        active.rejected_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());
        let rejected = active.update(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        self.audit
            .record_changes(
                "PRODUCTION_CONFIRMATION",
                confirmation_id,
                "CONFIRMATION_REJECTED",
                actor,
                &ChangeSet::new().with("status", Some(&previous_status), Some("REJECTED")),
            )
            .await;
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::ConfirmationRejected {
                    confirmation_id,
                    reason: reason.to_owned(),
                })
                .await;
        }
        Ok(rejected)
    }

    async fn load_operation_for_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        operation_id: Uuid,
    ) -> Result<operation::Model, ServiceError> {
        let mut query = OperationEntity::find_by_id(operation_id);
        if conn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        query
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("operation", operation_id))
    }

    /// Validates and applies one consumption line: inventory and owning batch
    /// move toward CONSUMED, and a CONSUME movement is recorded.
    async fn consume_line<C: ConnectionTrait>(
        &self,
        conn: &C,
        line: &MaterialConsumption,
        op: &operation::Model,
        order_id: Uuid,
        confirmation_id: Uuid,
        actor: &str,
    ) -> Result<ConsumptionOutcome, ServiceError> {
        let mut query = InventoryEntity::find_by_id(line.inventory_id);
        if conn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        let inv = query
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("inventory", line.inventory_id))?;

        let previous_state = self
            .validator
            .validate_consumption(conn, &inv, Some(order_id))
            .await?;
        if line.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidInput(format!(
                "consumption quantity must be positive for inventory {}",
                inv.id
            )));
        }
        if line.quantity > inv.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "inventory {} has {} {}, requested {}",
                inv.id, inv.quantity, inv.unit, line.quantity
            )));
        }

        // Quality gate: a PRODUCTION batch still pending its quality decision
        // cannot be consumed.
        if let Some(batch_id) = inv.batch_id {
            let owning = BatchEntity::find_by_id(batch_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("batch", batch_id))?;
            if owning.status == BatchStatus::QualityPending.to_string() {
                return Err(ServiceError::InvalidOperation(format!(
                    "batch {} is pending a quality decision",
                    owning.batch_number
                )));
            }
        }

        let summary = ConsumedMaterialSummary {
            inventory_id: inv.id,
            batch_id: inv.batch_id,
            material_id: inv.material_id,
            material_name: inv.material_name.clone(),
            quantity: line.quantity,
            unit: inv.unit.clone(),
        };

        let now = Utc::now();
        let fully_consumed = line.quantity == inv.quantity;
        let batch_id = inv.batch_id;
        let inventory_id = inv.id;
        let unit = inv.unit.clone();
        let previous_quantity = inv.quantity;
        let remaining = inv.quantity - line.quantity;
        let mut inv_active: inventory::ActiveModel = inv.into();
        if fully_consumed {
            inv_active.state = Set(InventoryState::Consumed.to_string());
        } else {
            // Partial draw: quantity shrinks, state stays; CONSUMED rows keep
            // their quantity immutable.
            inv_active.quantity = Set(remaining);
        }
        inv_active.updated_at = Set(now);
        inv_active.update(conn).await.map_err(ServiceError::db_error)?;

        let mut batch_consumed = None;
        if fully_consumed {
            if let Some(batch_id) = batch_id {
                if let Some(owning) = BatchEntity::find_by_id(batch_id)
                    .one(conn)
                    .await
                    .map_err(ServiceError::db_error)?
                {
                    let open_inventory = InventoryEntity::find()
                        .filter(inventory::Column::BatchId.eq(batch_id))
                        .filter(
                            inventory::Column::State.ne(InventoryState::Consumed.to_string()),
                        )
                        .count(conn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    if open_inventory == 0 {
                        let previous_batch_status = owning.status.clone();
                        let mut batch_active: batch::ActiveModel = owning.into();
                        batch_active.status = Set(BatchStatus::Consumed.to_string());
                        batch_active.updated_at = Set(now);
                        batch_active
                            .update(conn)
                            .await
                            .map_err(ServiceError::db_error)?;
                        batch_consumed = Some((batch_id, previous_batch_status));
                    }
                }
            }
        }

        inventory_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            inventory_id: Set(inventory_id),
            batch_id: Set(batch_id),
            movement_type: Set(MovementType::Consume.to_string()),
            quantity: Set(line.quantity),
            unit: Set(unit),
            operation_id: Set(Some(op.id)),
            confirmation_id: Set(Some(confirmation_id)),
            actor: Set(actor.to_owned()),
            created_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        Ok(ConsumptionOutcome {
            summary,
            previous_state,
            previous_quantity,
            remaining_quantity: remaining,
            fully_consumed,
            batch_consumed,
        })
    }

    /// Creates one output batch with its inventory row, PRODUCE movement, and
    /// genealogy edges to every consumed input batch.
    async fn create_output_batch<C: ConnectionTrait>(
        &self,
        conn: &C,
        op: &operation::Model,
        line_item: &order_line_item::Model,
        quantity: Decimal,
        materials_consumed: &[ConsumedMaterialSummary],
        confirmation_id: Uuid,
        actor: &str,
    ) -> Result<OutputBatchSummary, ServiceError> {
        let batch_number = self
            .batch_numbers
            .generate_in(
                conn,
                &op.operation_type,
                Some(line_item.product_material_id),
                Some(&line_item.product_sku),
            )
            .await?;

        let now = Utc::now();
        let new_batch = batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            batch_number: Set(batch_number.clone()),
            material_id: Set(line_item.product_material_id),
            material_name: Set(line_item.product_name.clone()),
            quantity: Set(quantity),
            unit: Set(op.unit.clone()),
            status: Set(BatchStatus::QualityPending.to_string()),
            generated_at_operation_id: Set(Some(op.id)),
            created_via: Set(BatchOrigin::Production.to_string()),
            supplier_name: Set(None),
            supplier_lot_number: Set(None),
            quality_decided_by: Set(None),
            quality_decided_at: Set(None),
            created_by: Set(actor.to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        let material_type = output_material_type(conn, op).await?;
        let new_inventory = inventory::ActiveModel {
            id: Set(Uuid::new_v4()),
            material_id: Set(line_item.product_material_id),
            material_name: Set(line_item.product_name.clone()),
            material_type: Set(material_type),
            quantity: Set(quantity),
            unit: Set(op.unit.clone()),
            state: Set(InventoryState::Available.to_string()),
            location: Set(None),
            batch_id: Set(Some(new_batch.id)),
            reserved_for_order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        inventory_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            inventory_id: Set(new_inventory.id),
            batch_id: Set(Some(new_batch.id)),
            movement_type: Set(MovementType::Produce.to_string()),
            quantity: Set(quantity),
            unit: Set(op.unit.clone()),
            operation_id: Set(Some(op.id)),
            confirmation_id: Set(Some(confirmation_id)),
            actor: Set(actor.to_owned()),
            created_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        // Every output shares the same consumed-input edges, each carrying
        // that consumption line's quantity.
        for consumed in materials_consumed {
            let Some(parent_batch_id) = consumed.batch_id else {
                continue;
            };
            batch_relation::ActiveModel {
                id: Set(Uuid::new_v4()),
                parent_batch_id: Set(parent_batch_id),
                child_batch_id: Set(new_batch.id),
                quantity_consumed: Set(consumed.quantity),
                unit: Set(consumed.unit.clone()),
                relation_type: Set(RelationType::Merge.to_string()),
                operation_id: Set(Some(op.id)),
                created_at: Set(now),
            }
            .insert(conn)
            .await
            .map_err(ServiceError::db_error)?;
        }

        Ok(OutputBatchSummary {
            batch_id: new_batch.id,
            batch_number,
            inventory_id: new_inventory.id,
            quantity,
        })
    }
}

fn validate_request(request: &ConfirmProductionRequest) -> Result<(), ServiceError> {
    if request.produced_quantity <= Decimal::ZERO {
        return Err(ServiceError::InvalidInput(format!(
            "produced quantity must be positive, got {}",
            request.produced_quantity
        )));
    }
    if request.scrap_quantity < Decimal::ZERO {
        return Err(ServiceError::InvalidInput(format!(
            "scrap quantity cannot be negative, got {}",
            request.scrap_quantity
        )));
    }
    Ok(())
}

/// FG for the last operation of the line's routing, WIP upstream.
async fn output_material_type<C: ConnectionTrait>(
    conn: &C,
    op: &operation::Model,
) -> Result<String, ServiceError> {
    let downstream = OperationEntity::find()
        .filter(operation::Column::OrderLineItemId.eq(op.order_line_item_id))
        .filter(operation::Column::SequenceNumber.gt(op.sequence_number))
        .count(conn)
        .await
        .map_err(ServiceError::db_error)?;
    let material_type = if downstream == 0 {
        MaterialType::Fg
    } else {
        MaterialType::Wip
    };
    Ok(material_type.as_str().to_owned())
}

async fn mark_step_in_progress<C: ConnectionTrait>(
    conn: &C,
    operation_id: Uuid,
) -> Result<(), ServiceError> {
    if let Some(step) = RoutingStepEntity::find()
        .filter(routing_step::Column::OperationId.eq(operation_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
    {
        let mut active: routing_step::ActiveModel = step.into();
        active.status = Set(RoutingStepStatus::InProgress.to_string());
        active.updated_at = Set(Utc::now());
        active.update(conn).await.map_err(ServiceError::db_error)?;
    }
    Ok(())
}

/// Checks submitted parameters against configured bounds. Violations abort
/// with the full list of offending parameter names; warnings are returned.
async fn validate_parameters<C: ConnectionTrait>(
    conn: &C,
    op: &operation::Model,
    product_sku: &str,
    parameters: &[ParameterValue],
) -> Result<Vec<String>, ServiceError> {
    let configs = ProcessParameterConfigEntity::find()
        .filter(process_parameter_config::Column::OperationType.eq(op.operation_type.clone()))
        .filter(process_parameter_config::Column::Status.eq("ACTIVE"))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    // A SKU-specific config shadows the generic one for the same parameter.
    let mut effective: std::collections::HashMap<&str, &process_parameter_config::Model> =
        std::collections::HashMap::new();
    for config in &configs {
        match &config.product_sku {
            Some(sku) if sku != product_sku => continue,
            _ => {}
        }
        let entry = effective.entry(config.parameter_name.as_str());
        match entry {
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(config);
            }
            std::collections::hash_map::Entry::Occupied(mut o) => {
                if config.product_sku.is_some() && o.get().product_sku.is_none() {
                    o.insert(config);
                }
            }
        }
    }

    let near_limit: Decimal = NEAR_LIMIT_FRACTION.parse().unwrap_or_default();
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    for (name, config) in &effective {
        let supplied = parameters.iter().find(|p| p.name == **name);
        let Some(supplied) = supplied else {
            if config.required {
                violations.push((*name).to_owned());
            }
            continue;
        };
        let value = supplied.value;
        let below = config.min_value.map(|min| value < min).unwrap_or(false);
        let above = config.max_value.map(|max| value > max).unwrap_or(false);
        if below || above {
            violations.push((*name).to_owned());
            continue;
        }
        if let (Some(min), Some(max)) = (config.min_value, config.max_value) {
            let band = (max - min) * near_limit;
            if band > Decimal::ZERO && (value - min < band || max - value < band) {
                warnings.push(format!("parameter {} is near its configured limit", name));
            }
        }
    }

    for supplied in parameters {
        if !effective.contains_key(supplied.name.as_str()) {
            warnings.push(format!(
                "parameter {} is not configured for operation type {}",
                supplied.name, op.operation_type
            ));
        }
    }

    if !violations.is_empty() {
        violations.sort();
        return Err(ServiceError::ValidationError(format!(
            "parameter validation failed: {}",
            violations.join(", ")
        )));
    }
    if !warnings.is_empty() {
        warn!(operation_id = %op.id, warnings = warnings.len(), "parameter warnings recorded");
    }
    Ok(warnings)
}
