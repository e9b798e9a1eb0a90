use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A traceable lot of material, independent of its physical storage location.
///
/// `batch_number` is globally unique and immutable after creation. Batches
/// created via PRODUCTION start in QUALITY_PENDING and need an explicit
/// quality decision before they can be consumed downstream.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub batch_number: String,
    pub material_id: Uuid,
    pub material_name: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: rust_decimal::Decimal,
    pub unit: String,
    pub status: String,
    pub generated_at_operation_id: Option<Uuid>,
    /// RECEIPT, PRODUCTION, SPLIT, MERGE or MANUAL
    pub created_via: String,
    pub supplier_name: Option<String>,
    pub supplier_lot_number: Option<String>,
    pub quality_decided_by: Option<String>,
    pub quality_decided_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::inventory::Entity")]
    Inventory,
}

impl Related<super::inventory::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Inventory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    QualityPending,
    Available,
    Consumed,
    Blocked,
    OnHold,
    Scrapped,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchOrigin {
    Receipt,
    Production,
    Split,
    Merge,
    Manual,
}
