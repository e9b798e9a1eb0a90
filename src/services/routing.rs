use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        operation::{self, Entity as OperationEntity, OperationStatus},
        order_line_item::{self, Entity as OrderLineItemEntity},
        process::{self, Entity as ProcessEntity, ProcessStatus},
        process_template::{self, Entity as ProcessTemplateEntity},
        routing::{self, Entity as RoutingEntity, RoutingStatus, RoutingType},
        routing_step::{self, Entity as RoutingStepEntity, RoutingStepStatus},
        template_step::{self, Entity as TemplateStepEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Everything created by one routing instantiation.
#[derive(Debug, Clone)]
pub struct InstantiatedRouting {
    pub process: process::Model,
    pub routing: routing::Model,
    pub operations: Vec<operation::Model>,
    pub routing_steps: Vec<routing_step::Model>,
}

/// Result of advancing a routing after an operation completed.
#[derive(Debug, Clone)]
pub struct ProgressionResult {
    pub activated_operations: Vec<operation::Model>,
    pub routing_completed: bool,
}

/// Expands a design-time process template into a runtime sequence of
/// operations, and advances that sequence as operations complete.
#[derive(Clone)]
pub struct RoutingService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl RoutingService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Instantiates the effective process template for an order line item.
    ///
    /// Creates one runtime process (reused if present), one routing, and per
    /// template step one operation plus its mirrored routing step. The first
    /// operation is forced READY; everything downstream waits on progression.
    #[instrument(skip(self))]
    pub async fn instantiate(
        &self,
        order_line_item_id: Uuid,
        target_quantity: Decimal,
        actor: &str,
    ) -> Result<InstantiatedRouting, ServiceError> {
        if target_quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidInput(format!(
                "target quantity must be positive, got {}",
                target_quantity
            )));
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let line_item = OrderLineItemEntity::find_by_id(order_line_item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("order line item", order_line_item_id))?;

        let template = resolve_template(&txn, &line_item.product_sku).await?;
        let steps = TemplateStepEntity::find()
            .filter(template_step::Column::ProcessTemplateId.eq(template.id))
            .order_by_asc(template_step::Column::SequenceNumber)
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if steps.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "process template {} has no routing steps",
                template.name
            )));
        }

        let existing_routing = RoutingEntity::find()
            .filter(routing::Column::OrderLineItemId.eq(order_line_item_id))
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if existing_routing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "order line item {} already has a routing",
                order_line_item_id
            )));
        }

        let now = Utc::now();
        let process = match ProcessEntity::find()
            .filter(process::Column::OrderLineItemId.eq(order_line_item_id))
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
        {
            Some(existing) => existing,
            None => process::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_line_item_id: Set(order_line_item_id),
                process_template_id: Set(template.id),
                name: Set(template.name.clone()),
                status: Set(ProcessStatus::Active.to_string()),
                created_by: Set(actor.to_owned()),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?,
        };

        let routing_row = routing::ActiveModel {
            id: Set(Uuid::new_v4()),
            process_id: Set(process.id),
            order_line_item_id: Set(order_line_item_id),
            routing_type: Set(template.routing_type.clone()),
            status: Set(RoutingStatus::Active.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut operations = Vec::with_capacity(steps.len());
        let mut routing_steps = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            // Only the first operation starts eligible for confirmation.
            let status = if index == 0 {
                OperationStatus::Ready
            } else {
                OperationStatus::NotStarted
            };
            let op = operation::ActiveModel {
                id: Set(Uuid::new_v4()),
                process_id: Set(process.id),
                order_line_item_id: Set(order_line_item_id),
                name: Set(step.name.clone()),
                operation_type: Set(step.operation_type.clone()),
                sequence_number: Set(step.sequence_number),
                status: Set(status.to_string()),
                target_quantity: Set(target_quantity),
                confirmed_quantity: Set(Decimal::ZERO),
                unit: Set(line_item.unit.clone()),
                produces_output_batch: Set(step.produces_output_batch),
                block_reason: Set(None),
                blocked_by: Set(None),
                blocked_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

            let step_status = if index == 0 {
                RoutingStepStatus::Ready
            } else {
                RoutingStepStatus::NotStarted
            };
            let routing_step = routing_step::ActiveModel {
                id: Set(Uuid::new_v4()),
                routing_id: Set(routing_row.id),
                operation_id: Set(op.id),
                sequence_number: Set(step.sequence_number),
                status: Set(step_status.to_string()),
                parallel: Set(step.parallel),
                mandatory: Set(step.mandatory),
                produces_output_batch: Set(step.produces_output_batch),
                allows_split: Set(step.allows_split),
                allows_merge: Set(step.allows_merge),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

            operations.push(op);
            routing_steps.push(routing_step);
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        metrics::counter!("mes_routings_instantiated_total", 1);
        info!(
            routing_id = %routing_row.id,
            operations = operations.len(),
            "routing instantiated"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::RoutingInstantiated {
                    routing_id: routing_row.id,
                    order_line_item_id,
                    operation_count: operations.len(),
                })
                .await;
            sender
                .send_or_log(Event::OperationActivated {
                    operation_id: operations[0].id,
                    sequence_number: operations[0].sequence_number,
                })
                .await;
        }

        Ok(InstantiatedRouting {
            process,
            routing: routing_row,
            operations,
            routing_steps,
        })
    }

    /// Marks the completed operation's routing step COMPLETED and activates
    /// the next sequence level. Runs in its own transaction.
    #[instrument(skip(self))]
    pub async fn progress_to_next_operation(
        &self,
        completed_operation_id: Uuid,
    ) -> Result<ProgressionResult, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let result = self
            .progress_to_next_operation_in(&txn, completed_operation_id)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        self.emit_progression(&result).await;
        Ok(result)
    }

    /// Progression on the caller's connection: the orchestrator runs this
    /// inside its confirmation transaction. No events are emitted here;
    /// callers emit after their commit.
    pub async fn progress_to_next_operation_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        completed_operation_id: Uuid,
    ) -> Result<ProgressionResult, ServiceError> {
        let completed_step = RoutingStepEntity::find()
            .filter(routing_step::Column::OperationId.eq(completed_operation_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "routing step for operation {} not found",
                    completed_operation_id
                ))
            })?;

        let routing_row = RoutingEntity::find_by_id(completed_step.routing_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("routing", completed_step.routing_id))?;

        let now = Utc::now();
        let completed_sequence = completed_step.sequence_number;
        let mut active_step: routing_step::ActiveModel = completed_step.into();
        active_step.status = Set(RoutingStepStatus::Completed.to_string());
        active_step.updated_at = Set(now);
        active_step
            .update(conn)
            .await
            .map_err(ServiceError::db_error)?;

        // Candidates at the next sequence level of the same routing.
        let pending_steps = RoutingStepEntity::find()
            .filter(routing_step::Column::RoutingId.eq(routing_row.id))
            .filter(routing_step::Column::SequenceNumber.gt(completed_sequence))
            .filter(routing_step::Column::Status.eq(RoutingStepStatus::NotStarted.to_string()))
            .order_by_asc(routing_step::Column::SequenceNumber)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        let Some(next_sequence) = pending_steps.first().map(|s| s.sequence_number) else {
            return self.complete_routing(conn, routing_row).await;
        };

        let parallel = routing_row.routing_type == RoutingType::TypeParallel.to_string();
        let candidates: Vec<routing_step::Model> = pending_steps
            .into_iter()
            .filter(|s| s.sequence_number == next_sequence)
            .collect();
        let to_activate: Vec<routing_step::Model> = if parallel {
            candidates
        } else {
            candidates.into_iter().take(1).collect()
        };

        let mut activated_operations = Vec::with_capacity(to_activate.len());
        for step in to_activate {
            let operation_id = step.operation_id;
            let mut step_active: routing_step::ActiveModel = step.into();
            step_active.status = Set(RoutingStepStatus::Ready.to_string());
            step_active.updated_at = Set(now);
            step_active
                .update(conn)
                .await
                .map_err(ServiceError::db_error)?;

            let op = OperationEntity::find_by_id(operation_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("operation", operation_id))?;
            let mut op_active: operation::ActiveModel = op.into();
            op_active.status = Set(OperationStatus::Ready.to_string());
            op_active.updated_at = Set(now);
            let activated = op_active.update(conn).await.map_err(ServiceError::db_error)?;
            activated_operations.push(activated);
        }

        Ok(ProgressionResult {
            activated_operations,
            routing_completed: false,
        })
    }

    async fn complete_routing<C: ConnectionTrait>(
        &self,
        conn: &C,
        routing_row: routing::Model,
    ) -> Result<ProgressionResult, ServiceError> {
        let now = Utc::now();
        let process_id = routing_row.process_id;
        let mut routing_active: routing::ActiveModel = routing_row.into();
        routing_active.status = Set(RoutingStatus::Completed.to_string());
        routing_active.updated_at = Set(now);
        routing_active
            .update(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if let Some(proc) = ProcessEntity::find_by_id(process_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
        {
            let mut proc_active: process::ActiveModel = proc.into();
            proc_active.status = Set(ProcessStatus::Completed.to_string());
            proc_active.updated_at = Set(now);
            proc_active
                .update(conn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        Ok(ProgressionResult {
            activated_operations: Vec::new(),
            routing_completed: true,
        })
    }

    /// Emits activation events for a progression result.
    pub async fn emit_progression(&self, result: &ProgressionResult) {
        if let Some(sender) = &self.event_sender {
            for op in &result.activated_operations {
                sender
                    .send_or_log(Event::OperationActivated {
                        operation_id: op.id,
                        sequence_number: op.sequence_number,
                    })
                    .await;
            }
        }
    }

    /// A routing is locked against structural edits once any step has
    /// started or completed.
    pub async fn is_locked(&self, routing_id: Uuid) -> Result<bool, ServiceError> {
        routing_locked(&*self.db, routing_id).await
    }
}

pub async fn routing_locked<C: ConnectionTrait>(
    conn: &C,
    routing_id: Uuid,
) -> Result<bool, ServiceError> {
    let steps = RoutingStepEntity::find()
        .filter(routing_step::Column::RoutingId.eq(routing_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(steps.iter().any(|s| {
        s.status == RoutingStepStatus::InProgress.to_string()
            || s.status == RoutingStepStatus::Completed.to_string()
    }))
}

/// Resolves the single effective ACTIVE template for a product: current date
/// inside [effective_from, effective_to], newest version on ties.
async fn resolve_template<C: ConnectionTrait>(
    conn: &C,
    product_sku: &str,
) -> Result<process_template::Model, ServiceError> {
    let today = Utc::now().date_naive();
    let candidates = ProcessTemplateEntity::find()
        .filter(process_template::Column::ProductSku.eq(product_sku))
        .filter(process_template::Column::Status.eq("ACTIVE"))
        .order_by_desc(process_template::Column::Version)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    candidates
        .into_iter()
        .find(|t| {
            t.effective_from.map(|from| from <= today).unwrap_or(true)
                && t.effective_to.map(|to| today <= to).unwrap_or(true)
        })
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "no effective process template for product {}",
                product_sku
            ))
        })
}
