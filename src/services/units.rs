use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;

use crate::{
    entities::unit_of_measure::{self, Entity as UnitOfMeasureEntity},
    errors::ServiceError,
};

/// Scale applied when a unit has no configured precision.
pub const DEFAULT_SCALE: u32 = 3;

/// Unit-of-measure lookups and quantity rounding.
#[derive(Clone)]
pub struct UnitService {
    db: Arc<DatabaseConnection>,
}

impl UnitService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Decimal precision configured for a unit code; DEFAULT_SCALE when the
    /// unit is unknown or inactive.
    pub async fn scale_for(&self, unit_code: &str) -> Result<u32, ServiceError> {
        self.scale_for_in(&*self.db, unit_code).await
    }

    pub async fn scale_for_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        unit_code: &str,
    ) -> Result<u32, ServiceError> {
        let unit = UnitOfMeasureEntity::find()
            .filter(unit_of_measure::Column::Code.eq(unit_code))
            .filter(unit_of_measure::Column::Status.eq("ACTIVE"))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(unit
            .map(|u| u.decimal_precision.max(0) as u32)
            .unwrap_or(DEFAULT_SCALE))
    }

    /// Rounds a quantity to the unit's configured scale, half away from zero.
    pub async fn quantize(&self, quantity: Decimal, unit_code: &str) -> Result<Decimal, ServiceError> {
        let scale = self.scale_for(unit_code).await?;
        Ok(quantize_to_scale(quantity, scale))
    }
}

pub fn quantize_to_scale(quantity: Decimal, scale: u32) -> Decimal {
    quantity.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_rounds_half_away_from_zero() {
        assert_eq!(quantize_to_scale(dec!(1.2345), 3), dec!(1.235));
        assert_eq!(quantize_to_scale(dec!(1.2344), 3), dec!(1.234));
        assert_eq!(quantize_to_scale(dec!(10), 2), dec!(10));
    }
}
