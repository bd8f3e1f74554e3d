use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set};
use uuid::Uuid;

use crate::db::entities::{prelude::*, service};
use crate::db::enums::ServiceStatus;

pub async fn get_service(
    db: &DatabaseConnection,
    service_id: Uuid,
) -> Result<Option<service::Model>, DbErr> {
    Service::find_by_id(service_id).one(db).await
}

pub async fn list_services(db: &DatabaseConnection) -> Result<Vec<service::Model>, DbErr> {
    Service::find().all(db).await
}

pub async fn set_status(
    db: &DatabaseConnection,
    service: service::Model,
    status: ServiceStatus,
) -> Result<service::Model, DbErr> {
    let mut active: service::ActiveModel = service.into();
    active.status = Set(status);
    active.updated_at = Set(Utc::now());
    active.update(db).await
}
