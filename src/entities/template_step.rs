use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One design-time step of a process template. Instantiation copies these
/// into runtime operations and routing steps, preserving sequence and flags.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "template_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub process_template_id: Uuid,
    pub sequence_number: i32,
    pub name: String,
    pub operation_type: String,
    pub parallel: bool,
    pub mandatory: bool,
    pub produces_output_batch: bool,
    pub allows_split: bool,
    pub allows_merge: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::process_template::Entity",
        from = "Column::ProcessTemplateId",
        to = "super::process_template::Column::Id"
    )]
    ProcessTemplate,
}

impl Related<super::process_template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProcessTemplate.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
