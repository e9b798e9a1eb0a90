use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An administrative block on an entity, keyed by (entity_type, entity_id).
/// At most one ACTIVE hold may exist per key. Holds are closed by release,
/// never deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "hold_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// OPERATION, PROCESS, ORDER_LINE, INVENTORY or BATCH
    pub entity_type: String,
    pub entity_id: Uuid,
    pub reason: String,
    pub status: String,
    /// Entity status at apply time; release restores this.
    pub previous_status: Option<String>,
    pub applied_by: String,
    pub applied_at: DateTime<Utc>,
    pub released_by: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_comments: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Released,
}
