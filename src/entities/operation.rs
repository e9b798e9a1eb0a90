use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One runtime step of a process instance, the unit production confirmation
/// targets.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub process_id: Uuid,
    pub order_line_item_id: Uuid,
    pub name: String,
    pub operation_type: String,
    pub sequence_number: i32,
    pub status: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub target_quantity: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub confirmed_quantity: rust_decimal::Decimal,
    pub unit: String,
    pub produces_output_batch: bool,
    pub block_reason: Option<String>,
    pub blocked_by: Option<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::process::Entity",
        from = "Column::ProcessId",
        to = "super::process::Column::Id"
    )]
    Process,
    #[sea_orm(has_many = "super::production_confirmation::Entity")]
    ProductionConfirmations,
}

impl Related<super::process::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Process.def()
    }
}

impl Related<super::production_confirmation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionConfirmations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    NotStarted,
    Ready,
    InProgress,
    Confirmed,
    Blocked,
    OnHold,
}
