use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::db::entities::{monitor, prelude::*};

/// The authoritative monitor set the scheduler reconciles against.
pub async fn list_active_monitors(db: &DatabaseConnection) -> Result<Vec<monitor::Model>, DbErr> {
    Monitor::find()
        .filter(monitor::Column::Active.eq(true))
        .all(db)
        .await
}

pub async fn get_monitor(
    db: &DatabaseConnection,
    monitor_id: Uuid,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find_by_id(monitor_id).one(db).await
}
