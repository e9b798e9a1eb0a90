use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    entities::batch_size_config::{self, Entity as BatchSizeConfigEntity},
    errors::ServiceError,
};

/// Result of planning output batch sizes for a produced quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub batch_sizes: Vec<Decimal>,
    pub batch_count: usize,
    pub has_partial_batch: bool,
    pub config_used: Option<Uuid>,
}

impl BatchPlan {
    fn single(quantity: Decimal, config_used: Option<Uuid>, partial: bool) -> Self {
        Self {
            batch_sizes: vec![quantity],
            batch_count: 1,
            has_partial_batch: partial,
            config_used,
        }
    }
}

/// Splits a produced quantity into one or more batches per the configured
/// min/max/preferred sizes. All arithmetic is exact decimal; the plan always
/// conserves the total and always yields at least one batch.
#[derive(Clone)]
pub struct BatchSizeService {
    db: Arc<DatabaseConnection>,
}

impl BatchSizeService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn plan(
        &self,
        total_quantity: Decimal,
        operation_type: &str,
        material_id: Option<Uuid>,
        product_sku: Option<&str>,
        equipment_type: Option<&str>,
    ) -> Result<BatchPlan, ServiceError> {
        self.plan_in(
            &*self.db,
            total_quantity,
            operation_type,
            material_id,
            product_sku,
            equipment_type,
        )
        .await
    }

    /// Same as [`plan`](Self::plan) but runs on the caller's connection so the
    /// orchestrator can plan inside its transaction.
    pub async fn plan_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        total_quantity: Decimal,
        operation_type: &str,
        material_id: Option<Uuid>,
        product_sku: Option<&str>,
        equipment_type: Option<&str>,
    ) -> Result<BatchPlan, ServiceError> {
        let config = resolve_config(conn, operation_type, material_id, product_sku, equipment_type)
            .await?;
        plan_with_config(total_quantity, config.as_ref())
    }
}

/// Finds the most specific ACTIVE sizing config for the request, or None.
pub async fn resolve_config<C: ConnectionTrait>(
    conn: &C,
    operation_type: &str,
    material_id: Option<Uuid>,
    product_sku: Option<&str>,
    equipment_type: Option<&str>,
) -> Result<Option<batch_size_config::Model>, ServiceError> {
    let candidates = BatchSizeConfigEntity::find()
        .filter(batch_size_config::Column::Status.eq("ACTIVE"))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut best: Option<(i32, batch_size_config::Model)> = None;
    for config in candidates {
        let Some(score) = specificity(&config, operation_type, material_id, product_sku, equipment_type)
        else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((best_score, best_config)) => {
                score > *best_score || (score == *best_score && config.priority < best_config.priority)
            }
        };
        if better {
            best = Some((score, config));
        }
    }
    Ok(best.map(|(_, config)| config))
}

/// Match score for a config against the request, or None if any populated
/// selector disagrees. Higher is more specific.
fn specificity(
    config: &batch_size_config::Model,
    operation_type: &str,
    material_id: Option<Uuid>,
    product_sku: Option<&str>,
    equipment_type: Option<&str>,
) -> Option<i32> {
    let mut score = 0;
    match &config.operation_type {
        Some(ot) if ot == operation_type => score += 8,
        Some(_) => return None,
        None => {}
    }
    match (config.material_id, material_id) {
        (Some(cm), Some(rm)) if cm == rm => score += 4,
        (Some(_), _) => return None,
        (None, _) => {}
    }
    match (&config.product_sku, product_sku) {
        (Some(cs), Some(rs)) if cs == rs => score += 2,
        (Some(_), _) => return None,
        (None, _) => {}
    }
    match (&config.equipment_type, equipment_type) {
        (Some(ce), Some(re)) if ce == re => score += 1,
        (Some(_), _) => return None,
        (None, _) => {}
    }
    Some(score)
}

/// Pure planning against an already-resolved config.
pub fn plan_with_config(
    total_quantity: Decimal,
    config: Option<&batch_size_config::Model>,
) -> Result<BatchPlan, ServiceError> {
    if total_quantity <= Decimal::ZERO {
        return Err(ServiceError::InvalidInput(format!(
            "total quantity must be positive, got {}",
            total_quantity
        )));
    }

    let Some(config) = config else {
        return Ok(BatchPlan::single(total_quantity, None, false));
    };

    let max = config.max_batch_size;
    let min = config.min_batch_size;
    if max <= Decimal::ZERO || min < Decimal::ZERO || min > max {
        return Err(ServiceError::InvalidInput(format!(
            "sizing config {} has inconsistent bounds min={} max={}",
            config.name, min, max
        )));
    }

    if total_quantity <= max {
        let partial = total_quantity < min;
        return Ok(BatchPlan::single(total_quantity, Some(config.id), partial));
    }

    let mut preferred = config.preferred_batch_size.unwrap_or(max);
    if preferred > max || preferred <= Decimal::ZERO {
        preferred = max;
    }

    let mut batch_sizes = Vec::new();
    let mut remaining = total_quantity;
    while remaining >= preferred {
        batch_sizes.push(preferred);
        remaining -= preferred;
    }

    let mut has_partial_batch = false;
    if remaining > Decimal::ZERO {
        let fits_in_last = batch_sizes
            .last()
            .map(|last| *last + remaining <= max)
            .unwrap_or(false);
        if remaining >= min && config.allow_partial {
            batch_sizes.push(remaining);
            has_partial_batch = true;
        } else if fits_in_last {
            let last = batch_sizes.last_mut().unwrap();
            *last += remaining;
        } else {
            // Quantity must be conserved even when the remainder violates the
            // configured minimum.
            batch_sizes.push(remaining);
            has_partial_batch = true;
        }
    }

    debug!(
        config = %config.name,
        batches = batch_sizes.len(),
        partial = has_partial_batch,
        "planned output batches"
    );

    Ok(BatchPlan {
        batch_count: batch_sizes.len(),
        has_partial_batch,
        config_used: Some(config.id),
        batch_sizes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn config(
        min: Decimal,
        max: Decimal,
        preferred: Option<Decimal>,
        allow_partial: bool,
    ) -> batch_size_config::Model {
        batch_size_config::Model {
            id: Uuid::new_v4(),
            name: "test".into(),
            operation_type: None,
            material_id: None,
            product_sku: None,
            equipment_type: None,
            min_batch_size: min,
            max_batch_size: max,
            preferred_batch_size: preferred,
            allow_partial,
            priority: 100,
            status: "ACTIVE".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn splits_with_partial_remainder() {
        let cfg = config(dec!(20), dec!(100), Some(dec!(100)), true);
        let plan = plan_with_config(dec!(250), Some(&cfg)).unwrap();
        assert_eq!(plan.batch_sizes, vec![dec!(100), dec!(100), dec!(50)]);
        assert_eq!(plan.batch_count, 3);
        assert!(plan.has_partial_batch);
    }

    #[test]
    fn single_batch_when_under_max() {
        let cfg = config(dec!(20), dec!(100), None, true);
        let plan = plan_with_config(dec!(95), Some(&cfg)).unwrap();
        assert_eq!(plan.batch_sizes, vec![dec!(95)]);
        assert_eq!(plan.batch_count, 1);
        assert!(!plan.has_partial_batch);
    }

    #[test]
    fn small_remainder_folds_into_last_batch() {
        // 210 = 100 + 100 + 10; 10 < min 20 and 100 + 10 > max would not
        // hold here, so it folds only when it fits.
        let cfg = config(dec!(20), dec!(120), Some(dec!(100)), true);
        let plan = plan_with_config(dec!(210), Some(&cfg)).unwrap();
        assert_eq!(plan.batch_sizes, vec![dec!(100), dec!(110)]);
        assert!(!plan.has_partial_batch);
    }

    #[test]
    fn small_remainder_that_cannot_fold_stays_partial() {
        let cfg = config(dec!(20), dec!(100), Some(dec!(100)), true);
        let plan = plan_with_config(dec!(210), Some(&cfg)).unwrap();
        assert_eq!(plan.batch_sizes, vec![dec!(100), dec!(100), dec!(10)]);
        assert!(plan.has_partial_batch);
    }

    #[test]
    fn no_config_yields_single_batch() {
        let plan = plan_with_config(dec!(7.5), None).unwrap();
        assert_eq!(plan.batch_sizes, vec![dec!(7.5)]);
        assert!(plan.config_used.is_none());
    }

    #[test]
    fn plan_conserves_total() {
        let cfg = config(dec!(5), dec!(33), Some(dec!(30)), false);
        let total = dec!(101.25);
        let plan = plan_with_config(total, Some(&cfg)).unwrap();
        let sum: Decimal = plan.batch_sizes.iter().copied().sum();
        assert_eq!(sum, total);
        assert!(plan.batch_count >= 1);
    }

    #[test]
    fn zero_quantity_rejected() {
        assert!(plan_with_config(Decimal::ZERO, None).is_err());
    }
}
