use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Configured process parameter bounds, resolved by operation type and
/// optionally narrowed to a product SKU.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "process_parameter_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub operation_type: String,
    pub product_sku: Option<String>,
    pub parameter_name: String,
    pub required: bool,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub min_value: Option<rust_decimal::Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub max_value: Option<rust_decimal::Decimal>,
    pub unit: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
