use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::ProbeKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "monitors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub service_id: Uuid,
    pub name: String,
    pub url: String,
    pub method: String,
    pub kind: ProbeKind,
    pub interval_seconds: i32,
    /// JSON array of `{ "key": ..., "value": ... }` entries.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub headers: Option<Json>,
    pub active: bool,
    pub degraded_threshold_ms: i32,
    pub timeout_ms: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::service::Entity",
        from = "Column::ServiceId",
        to = "super::service::Column::Id",
        on_delete = "Cascade"
    )]
    Service,

    #[sea_orm(has_many = "super::monitoring_result::Entity")]
    MonitoringResult,
}

impl Related<super::service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Service.def()
    }
}

impl Related<super::monitoring_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitoringResult.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
