use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Batch numbering pattern configuration.
///
/// Resolution precedence: (operation_type, material_id, product_sku) >
/// (operation_type, material_id) > (operation_type, product_sku) >
/// (operation_type) > default (operation_type NULL). Only ACTIVE configs are
/// eligible; ties break by lowest priority.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batch_number_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    pub operation_type: Option<String>,
    pub material_id: Option<Uuid>,
    pub product_sku: Option<String>,
    pub prefix: String,
    pub separator: String,
    pub include_op_code: bool,
    pub op_code_length: i32,
    /// chrono strftime format, e.g. "%Y%m%d"; None omits the date part
    pub date_format: Option<String>,
    pub sequence_length: i32,
    /// NEVER, YEARLY, MONTHLY or DAILY
    pub reset_policy: String,
    /// Suffix pattern for split batches; "{n}" is the 2-digit index
    pub split_suffix_format: Option<String>,
    pub priority: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::batch_number_sequence::Entity")]
    Sequences,
}

impl Related<super::batch_number_sequence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sequences.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetPolicy {
    Never,
    Yearly,
    Monthly,
    Daily,
}
