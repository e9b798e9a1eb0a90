use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An order line item: the production demand a routing is instantiated for.
/// Order intake itself lives outside this core; the row here carries only
/// what routing and confirmation need.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_line_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_sku: String,
    pub product_name: String,
    /// Material produced when this line's routing confirms output.
    pub product_material_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: rust_decimal::Decimal,
    pub unit: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::process::Entity")]
    Processes,
}

impl Related<super::process::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Processes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderLineStatus {
    Created,
    Released,
    InProduction,
    Completed,
    OnHold,
    Cancelled,
}
