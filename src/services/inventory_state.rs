use sea_orm::ConnectionTrait;
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    entities::inventory,
    errors::ServiceError,
    services::holds::{self, HoldEntityType},
};

/// Inventory lifecycle states.
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
pub enum InventoryState {
    Available,
    Reserved,
    Produced,
    Blocked,
    OnHold,
    Consumed,
    Scrapped,
}

impl InventoryState {
    /// Targets reachable from this state. CONSUMED and SCRAPPED are terminal.
    pub fn allowed_targets(self) -> &'static [InventoryState] {
        use InventoryState::*;
        match self {
            Available => &[Reserved, Consumed, Blocked, OnHold],
            Reserved => &[Available, Consumed, Blocked],
            Produced => &[Available, Consumed, Blocked],
            Blocked => &[Available, Scrapped],
            OnHold => &[Available, Blocked],
            Consumed => &[],
            Scrapped => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn parse(value: &str, entity_id: Uuid) -> Result<Self, ServiceError> {
        Self::from_str(value).map_err(|_| {
            ServiceError::InternalError(format!(
                "inventory {} has unrecognized state '{}'",
                entity_id, value
            ))
        })
    }
}

/// Validates a single state transition. Same-state is a no-op success.
pub fn validate_transition(
    entity_id: Uuid,
    current: InventoryState,
    next: InventoryState,
) -> Result<(), ServiceError> {
    if current == next || current.allowed_targets().contains(&next) {
        return Ok(());
    }
    Err(ServiceError::InvalidTransition {
        entity_id,
        from: current.to_string(),
        to: next.to_string(),
    })
}

/// Pure state-machine rules for inventory, composed with hold checks.
///
/// No method here writes anything; callers perform the state update and the
/// audit logging after validation passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryStateValidator;

impl InventoryStateValidator {
    pub fn new() -> Self {
        Self
    }

    fn current_state(&self, inventory: &inventory::Model) -> Result<InventoryState, ServiceError> {
        InventoryState::parse(&inventory.state, inventory.id)
    }

    async fn ensure_no_hold<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory: &inventory::Model,
    ) -> Result<(), ServiceError> {
        if holds::is_on_hold(conn, HoldEntityType::Inventory, inventory.id).await? {
            return Err(ServiceError::InvalidOperation(format!(
                "inventory {} has an active hold",
                inventory.id
            )));
        }
        if let Some(batch_id) = inventory.batch_id {
            if holds::is_on_hold(conn, HoldEntityType::Batch, batch_id).await? {
                return Err(ServiceError::InvalidOperation(format!(
                    "batch {} owning inventory {} has an active hold",
                    batch_id, inventory.id
                )));
            }
        }
        Ok(())
    }

    /// Consumption requires AVAILABLE or RESERVED, a matching reservation if
    /// one exists, and no active hold on the row or its owning batch.
    pub async fn validate_consumption<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory: &inventory::Model,
        order_id: Option<Uuid>,
    ) -> Result<InventoryState, ServiceError> {
        let current = self.current_state(inventory)?;
        match current {
            InventoryState::Available | InventoryState::Reserved => {}
            _ => {
                return Err(ServiceError::InvalidTransition {
                    entity_id: inventory.id,
                    from: current.to_string(),
                    to: InventoryState::Consumed.to_string(),
                })
            }
        }
        if current == InventoryState::Reserved {
            if let Some(reserved_for) = inventory.reserved_for_order_id {
                if order_id != Some(reserved_for) {
                    return Err(ServiceError::InvalidOperation(format!(
                        "inventory {} is reserved for order {}",
                        inventory.id, reserved_for
                    )));
                }
            }
        }
        self.ensure_no_hold(conn, inventory).await?;
        Ok(current)
    }

    /// Any field modification requires a non-terminal state and no hold.
    pub async fn validate_modification<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory: &inventory::Model,
    ) -> Result<(), ServiceError> {
        let current = self.current_state(inventory)?;
        if current.is_terminal() {
            return Err(ServiceError::InvalidTransition {
                entity_id: inventory.id,
                from: current.to_string(),
                to: current.to_string(),
            });
        }
        self.ensure_no_hold(conn, inventory).await
    }

    pub async fn validate_block<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory: &inventory::Model,
    ) -> Result<(), ServiceError> {
        let current = self.current_state(inventory)?;
        validate_transition(inventory.id, current, InventoryState::Blocked)?;
        self.ensure_no_hold(conn, inventory).await
    }

    /// Unblock additionally requires the row to actually be BLOCKED/ON_HOLD.
    pub async fn validate_unblock<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory: &inventory::Model,
    ) -> Result<(), ServiceError> {
        let current = self.current_state(inventory)?;
        if !matches!(current, InventoryState::Blocked | InventoryState::OnHold) {
            return Err(ServiceError::InvalidTransition {
                entity_id: inventory.id,
                from: current.to_string(),
                to: InventoryState::Available.to_string(),
            });
        }
        validate_transition(inventory.id, current, InventoryState::Available)?;
        self.ensure_no_hold(conn, inventory).await
    }

    pub async fn validate_scrap<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory: &inventory::Model,
    ) -> Result<(), ServiceError> {
        let current = self.current_state(inventory)?;
        validate_transition(inventory.id, current, InventoryState::Scrapped)?;
        self.ensure_no_hold(conn, inventory).await
    }

    /// Reserving a RESERVED row is rejected outright: the same-state no-op
    /// rule would otherwise let a second order overwrite the reservation.
    pub async fn validate_reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory: &inventory::Model,
    ) -> Result<(), ServiceError> {
        let current = self.current_state(inventory)?;
        if current == InventoryState::Reserved {
            return Err(ServiceError::InvalidTransition {
                entity_id: inventory.id,
                from: current.to_string(),
                to: InventoryState::Reserved.to_string(),
            });
        }
        validate_transition(inventory.id, current, InventoryState::Reserved)?;
        self.ensure_no_hold(conn, inventory).await
    }

    pub async fn validate_release_reservation<C: ConnectionTrait>(
        &self,
        conn: &C,
        inventory: &inventory::Model,
    ) -> Result<(), ServiceError> {
        let current = self.current_state(inventory)?;
        if current != InventoryState::Reserved {
            return Err(ServiceError::InvalidTransition {
                entity_id: inventory.id,
                from: current.to_string(),
                to: InventoryState::Available.to_string(),
            });
        }
        self.ensure_no_hold(conn, inventory).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn same_state_is_noop_success() {
        for state in InventoryState::iter() {
            let id = Uuid::new_v4();
            assert!(validate_transition(id, state, state).is_ok());
        }
    }

    #[test]
    fn terminal_states_allow_nothing_else() {
        for terminal in [InventoryState::Consumed, InventoryState::Scrapped] {
            for target in InventoryState::iter().filter(|t| *t != terminal) {
                let id = Uuid::new_v4();
                assert!(validate_transition(id, terminal, target).is_err());
            }
        }
    }

    #[test]
    fn state_strings_round_trip() {
        for state in InventoryState::iter() {
            let parsed = InventoryState::parse(&state.to_string(), Uuid::new_v4()).unwrap();
            assert_eq!(parsed, state);
        }
        assert_eq!(InventoryState::OnHold.to_string(), "ON_HOLD");
    }
}
