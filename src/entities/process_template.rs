use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Design-time process definition for a product. At most one template should
/// be ACTIVE and effective-dated for a given product SKU at any instant; the
/// instantiator rejects ambiguity by taking the newest version.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "process_templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_sku: String,
    pub name: String,
    pub version: i32,
    pub status: String,
    /// TYPE_SEQUENTIAL or TYPE_PARALLEL
    pub routing_type: String,
    pub effective_from: Option<NaiveDate>,
    pub effective_to: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::template_step::Entity")]
    TemplateSteps,
}

impl Related<super::template_step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TemplateSteps.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
