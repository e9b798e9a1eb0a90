use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only movement ledger row for an inventory record.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub inventory_id: Uuid,
    pub batch_id: Option<Uuid>,
    /// RECEIPT, CONSUME, PRODUCE, BLOCK, UNBLOCK, SCRAP, RESERVE,
    /// RELEASE_RESERVATION
    pub movement_type: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: rust_decimal::Decimal,
    pub unit: String,
    pub operation_id: Option<Uuid>,
    pub confirmation_id: Option<Uuid>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory::Entity",
        from = "Column::InventoryId",
        to = "super::inventory::Column::Id"
    )]
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
pub enum MovementType {
    Receipt,
    Consume,
    Produce,
    Block,
    Unblock,
    Scrap,
    Reserve,
    ReleaseReservation,
}
