use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Directed genealogy edge: parent batch consumed into child batch.
///
/// Edges are append-only. One edge is written per (parent, child, operation)
/// at production-confirmation time and never mutated afterwards, so the
/// genealogy graph stays a DAG by construction.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batch_relations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub parent_batch_id: Uuid,
    pub child_batch_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity_consumed: rust_decimal::Decimal,
    pub unit: String,
    /// MERGE or SPLIT
    pub relation_type: String,
    pub operation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::batch::Entity",
        from = "Column::ParentBatchId",
        to = "super::batch::Column::Id"
    )]
    ParentBatch,
    #[sea_orm(
        belongs_to = "super::batch::Entity",
        from = "Column::ChildBatchId",
        to = "super::batch::Column::Id"
    )]
    ChildBatch,
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Merge,
    Split,
}
