use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, TransactionTrait};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::entities::audit_event;

/// Default actor recorded when no authenticated caller is present.
pub const SYSTEM_ACTOR: &str = "system";

/// An explicit list of (field, old, new) changes for one mutation.
///
/// Mutating operations construct this by hand instead of diffing entities via
/// reflection, so the audit trail records exactly what the code changed.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<FieldChange>,
}

#[derive(Debug, Clone)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, old_value: Option<&str>, new_value: Option<&str>) -> Self {
        self.push(field, old_value, new_value);
        self
    }

    pub fn push(&mut self, field: &str, old_value: Option<&str>, new_value: Option<&str>) {
        self.changes.push(FieldChange {
            field: field.to_owned(),
            old_value: old_value.map(str::to_owned),
            new_value: new_value.map(str::to_owned),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter()
    }
}

/// Append-only audit emitter.
///
/// Every write runs in its own transaction on the shared pool, independent of
/// whatever business transaction triggered it; failures are logged at warn
/// level and suppressed so they can never roll back or fail the caller.
#[derive(Clone)]
pub struct AuditService {
    db: Arc<DatabaseConnection>,
}

impl AuditService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Records a single audit event. Never returns an error.
    pub async fn record(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        action: &str,
        field_name: Option<&str>,
        old_value: Option<&str>,
        new_value: Option<&str>,
        actor: &str,
    ) {
        if let Err(e) = self
            .try_record(
                entity_type,
                entity_id,
                action,
                field_name,
                old_value,
                new_value,
                actor,
            )
            .await
        {
            warn!(
                entity_type,
                %entity_id,
                action,
                "audit write failed, suppressing: {}",
                e
            );
        }
    }

    /// Records one audit row per change in the set, plus a bare action row
    /// when the set is empty.
    pub async fn record_changes(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        action: &str,
        actor: &str,
        changes: &ChangeSet,
    ) {
        if changes.is_empty() {
            self.record(entity_type, entity_id, action, None, None, None, actor)
                .await;
            return;
        }
        for change in changes.iter() {
            self.record(
                entity_type,
                entity_id,
                action,
                Some(&change.field),
                change.old_value.as_deref(),
                change.new_value.as_deref(),
                actor,
            )
            .await;
        }
    }

    async fn try_record(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        action: &str,
        field_name: Option<&str>,
        old_value: Option<&str>,
        new_value: Option<&str>,
        actor: &str,
    ) -> Result<(), sea_orm::DbErr> {
        let txn = self.db.begin().await?;
        audit_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            entity_type: Set(entity_type.to_owned()),
            entity_id: Set(entity_id),
            action: Set(action.to_owned()),
            field_name: Set(field_name.map(str::to_owned)),
            old_value: Set(old_value.map(str::to_owned)),
            new_value: Set(new_value.map(str::to_owned)),
            actor: Set(actor.to_owned()),
            recorded_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_set_collects_tuples_in_order() {
        let changes = ChangeSet::new()
            .with("status", Some("READY"), Some("IN_PROGRESS"))
            .with("confirmed_quantity", Some("0"), Some("40"));
        let fields: Vec<_> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["status", "confirmed_quantity"]);
        assert!(!changes.is_empty());
    }
}
