use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Runtime process instance: one per order line item, created when the order
/// line's routing is instantiated from a process template.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_line_item_id: Uuid,
    pub process_template_id: Uuid,
    pub name: String,
    pub status: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order_line_item::Entity",
        from = "Column::OrderLineItemId",
        to = "super::order_line_item::Column::Id"
    )]
    OrderLineItem,
    #[sea_orm(has_many = "super::operation::Entity")]
    Operations,
    #[sea_orm(has_many = "super::routing::Entity")]
    Routings,
}

impl Related<super::order_line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLineItem.def()
    }
}

impl Related<super::operation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Operations.def()
    }
}

impl Related<super::routing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Routings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Active,
    Completed,
    OnHold,
    Cancelled,
}
