//! Property tests for the pure pieces: the inventory state machine, the
//! batch size planner and quantity rounding.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use strum::IntoEnumIterator;
use uuid::Uuid;

use mes_core::entities::batch_size_config;
use mes_core::services::batch_sizing::plan_with_config;
use mes_core::services::inventory_state::{validate_transition, InventoryState};
use mes_core::services::units::quantize_to_scale;

fn any_state() -> impl Strategy<Value = InventoryState> {
    let states: Vec<InventoryState> = InventoryState::iter().collect();
    proptest::sample::select(states)
}

fn sizing_config(min: Decimal, max: Decimal, preferred: Option<Decimal>) -> batch_size_config::Model {
    batch_size_config::Model {
        id: Uuid::new_v4(),
        name: "prop".into(),
        operation_type: None,
        material_id: None,
        product_sku: None,
        equipment_type: None,
        min_batch_size: min,
        max_batch_size: max,
        preferred_batch_size: preferred,
        allow_partial: true,
        priority: 100,
        status: "ACTIVE".into(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

proptest! {
    #[test]
    fn transitions_out_of_terminal_states_always_fail(
        from in any_state(),
        to in any_state(),
    ) {
        let id = Uuid::new_v4();
        let result = validate_transition(id, from, to);
        if from == to {
            prop_assert!(result.is_ok());
        } else if from.is_terminal() {
            prop_assert!(result.is_err());
        } else {
            prop_assert_eq!(result.is_ok(), from.allowed_targets().contains(&to));
        }
    }

    #[test]
    fn transition_validity_matches_the_published_table(state in any_state()) {
        // Every allowed target must itself be a declared state, and terminal
        // states declare none.
        for target in state.allowed_targets() {
            prop_assert!(InventoryState::iter().any(|s| s == *target));
            prop_assert_ne!(*target, state);
        }
        if state.is_terminal() {
            prop_assert!(state.allowed_targets().is_empty());
        }
    }

    #[test]
    fn plans_conserve_quantity_and_respect_max(
        total_cents in 1u64..2_000_000,
        min_units in 0u64..50,
        span_units in 1u64..200,
        preferred_offset in proptest::option::of(0u64..200),
    ) {
        let total = Decimal::new(total_cents as i64, 2);
        let min = Decimal::from(min_units);
        let max = min + Decimal::from(span_units);
        let preferred = preferred_offset.map(|offset| {
            let candidate = min + Decimal::from(offset);
            if candidate > max { max } else { candidate }
        });

        let cfg = sizing_config(min, max, preferred);
        let plan = plan_with_config(total, Some(&cfg)).unwrap();

        let sum: Decimal = plan.batch_sizes.iter().copied().sum();
        prop_assert_eq!(sum, total);
        prop_assert_eq!(plan.batch_count, plan.batch_sizes.len());
        prop_assert!(plan.batch_count >= 1);
        for size in &plan.batch_sizes {
            prop_assert!(*size > Decimal::ZERO);
            prop_assert!(*size <= max);
        }
        // At most one batch may dip below the minimum.
        let undersized = plan.batch_sizes.iter().filter(|s| **s < min).count();
        prop_assert!(undersized <= 1);
    }

    #[test]
    fn quantize_is_idempotent_and_bounded(
        units in -1_000_000i64..1_000_000,
        exp in 0u32..9,
        scale in 0u32..6,
    ) {
        let value = Decimal::new(units, exp);
        let once = quantize_to_scale(value, scale);
        let twice = quantize_to_scale(once, scale);
        prop_assert_eq!(once, twice);
        prop_assert!(once.scale() <= scale);
        let bound = Decimal::new(5, scale + 1);
        prop_assert!((value - once).abs() <= bound);
    }
}
