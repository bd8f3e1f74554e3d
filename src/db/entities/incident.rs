use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{IncidentSeverity, IncidentStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "incidents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub organization_id: Uuid,
    #[sea_orm(nullable)]
    pub service_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub monitor_id: Option<Uuid>,
    pub title: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    pub status: IncidentStatus,
    pub severity: IncidentSeverity,
    pub auto_created: bool,
    pub auto_resolved: bool,
    /// JSON array of service ids the incident spans (set union, caller-maintained).
    #[sea_orm(column_type = "JsonBinary")]
    pub affected_service_ids: Json,
    #[sea_orm(nullable)]
    pub created_by_user_id: Option<Uuid>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
    /// Set if and only if `status` is RESOLVED.
    #[sea_orm(nullable)]
    pub resolved_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organization::Entity",
        from = "Column::OrganizationId",
        to = "super::organization::Column::Id",
        on_delete = "Cascade"
    )]
    Organization,

    #[sea_orm(
        belongs_to = "super::service::Entity",
        from = "Column::ServiceId",
        to = "super::service::Column::Id",
        on_delete = "SetNull"
    )]
    Service,

    #[sea_orm(
        belongs_to = "super::monitor::Entity",
        from = "Column::MonitorId",
        to = "super::monitor::Column::Id",
        on_delete = "SetNull"
    )]
    Monitor,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::CreatedByUserId",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    User,

    #[sea_orm(has_many = "super::incident_update::Entity")]
    IncidentUpdate,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl Related<super::service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Service.def()
    }
}

impl Related<super::monitor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Monitor.def()
    }
}

impl Related<super::incident_update::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IncidentUpdate.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
