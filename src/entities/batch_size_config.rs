use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Batch sizing rules for splitting a produced quantity into output batches.
/// Most specific ACTIVE config wins (material + sku + equipment over partial
/// matches over operation-type-only), ties broken by lowest priority.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batch_size_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    pub operation_type: Option<String>,
    pub material_id: Option<Uuid>,
    pub product_sku: Option<String>,
    pub equipment_type: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub min_batch_size: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub max_batch_size: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub preferred_batch_size: Option<rust_decimal::Decimal>,
    pub allow_partial: bool,
    pub priority: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
