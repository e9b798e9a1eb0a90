use sea_orm::error::DbErr;
use uuid::Uuid;

/// Crate-wide service error type.
///
/// Callers can rely on the variant to distinguish "not found" from "blocked by
/// hold" from "quantity exceeds available" without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An illegal state-machine transition. Carries the entity id and both
    /// states so the violation is diagnosable at the call site.
    #[error("Invalid transition for {entity_id}: {from} -> {to}")]
    InvalidTransition {
        entity_id: Uuid,
        from: String,
        to: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn db_error(err: DbErr) -> Self {
        ServiceError::DatabaseError(err)
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_carries_both_states() {
        let id = Uuid::new_v4();
        let err = ServiceError::InvalidTransition {
            entity_id: id,
            from: "CONSUMED".into(),
            to: "AVAILABLE".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("CONSUMED"));
        assert!(msg.contains("AVAILABLE"));
        assert!(msg.contains(&id.to_string()));
    }
}
