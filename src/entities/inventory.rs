use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A located, stateful quantity of material, optionally tied to a batch.
///
/// Rows are never physically deleted; the lifecycle runs through validated
/// state transitions and ends at CONSUMED or SCRAPPED.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub material_id: Uuid,
    pub material_name: String,
    /// RM, IM, FG or WIP
    pub material_type: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: rust_decimal::Decimal,
    pub unit: String,
    pub state: String,
    pub location: Option<String>,
    pub batch_id: Option<Uuid>,
    pub reserved_for_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::batch::Entity",
        from = "Column::BatchId",
        to = "super::batch::Column::Id"
    )]
    Batch,
    #[sea_orm(has_many = "super::inventory_movement::Entity")]
    InventoryMovements,
}

impl Related<super::batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batch.def()
    }
}

impl Related<super::inventory_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryMovements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Material classification carried on inventory rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialType {
    Rm,
    Im,
    Fg,
    Wip,
}

impl MaterialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialType::Rm => "RM",
            MaterialType::Im => "IM",
            MaterialType::Fg => "FG",
            MaterialType::Wip => "WIP",
        }
    }
}
