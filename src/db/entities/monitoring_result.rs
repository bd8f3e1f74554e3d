use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::MonitorStatus;

/// Append-only record of one probe. Rows are never mutated and are kept
/// after a monitor is deactivated.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "monitoring_results")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub checked_at: ChronoDateTimeUtc,
    pub status: MonitorStatus,
    #[sea_orm(nullable)]
    pub response_time_ms: Option<i32>,
    #[sea_orm(nullable)]
    pub http_status_code: Option<i32>,
    #[sea_orm(nullable)]
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::monitor::Entity",
        from = "Column::MonitorId",
        to = "super::monitor::Column::Id",
        on_delete = "Cascade"
    )]
    Monitor,
}

impl Related<super::monitor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Monitor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
