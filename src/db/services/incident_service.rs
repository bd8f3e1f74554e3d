//! Incident persistence: lookups, lifecycle writes and narrative updates.
//!
//! Every status-changing write appends its IncidentUpdate row in the same
//! transaction, so an incident's narrative can never drift from its state.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::db::entities::{incident, incident_update, monitor, prelude::*};
use crate::db::enums::{IncidentSeverity, IncidentStatus, MonitorStatus};

/// The single open auto-created incident for a monitor, if any.
///
/// At most one such row may be OPEN or MONITORING at a time; callers adopt
/// an existing row instead of inserting a second one.
pub async fn find_open_auto_incident(
    db: &DatabaseConnection,
    monitor_id: Uuid,
) -> Result<Option<incident::Model>, DbErr> {
    Incident::find()
        .filter(incident::Column::MonitorId.eq(monitor_id))
        .filter(incident::Column::AutoCreated.eq(true))
        .filter(incident::Column::Status.is_in([IncidentStatus::Open, IncidentStatus::Monitoring]))
        .order_by_desc(incident::Column::CreatedAt)
        .one(db)
        .await
}

/// Open manual incidents linked to a monitor; the engine only annotates
/// these, it never escalates or resolves them.
pub async fn find_open_manual_incidents(
    db: &DatabaseConnection,
    monitor_id: Uuid,
) -> Result<Vec<incident::Model>, DbErr> {
    Incident::find()
        .filter(incident::Column::MonitorId.eq(monitor_id))
        .filter(incident::Column::AutoCreated.eq(false))
        .filter(incident::Column::Status.is_in([IncidentStatus::Open, IncidentStatus::Monitoring]))
        .all(db)
        .await
}

pub async fn list_open_incidents(db: &DatabaseConnection) -> Result<Vec<incident::Model>, DbErr> {
    Incident::find()
        .filter(incident::Column::Status.is_in([IncidentStatus::Open, IncidentStatus::Monitoring]))
        .order_by_desc(incident::Column::CreatedAt)
        .all(db)
        .await
}

pub struct NewAutoIncident<'a> {
    pub monitor: &'a monitor::Model,
    pub organization_id: Uuid,
    pub verdict: MonitorStatus,
    pub severity: IncidentSeverity,
    pub opened_at: DateTime<Utc>,
}

/// Creates an auto incident together with its initial narrative update.
pub async fn create_auto_incident(
    db: &DatabaseConnection,
    new: NewAutoIncident<'_>,
) -> Result<incident::Model, DbErr> {
    let txn = db.begin().await?;

    let saved = incident::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(new.organization_id),
        service_id: Set(Some(new.monitor.service_id)),
        monitor_id: Set(Some(new.monitor.id)),
        title: Set(format!("{} {}", new.monitor.name, new.verdict)),
        description: Set(Some(format!(
            "Monitor {} is reporting status {}.",
            new.monitor.name, new.verdict
        ))),
        status: Set(IncidentStatus::Open),
        severity: Set(new.severity),
        auto_created: Set(true),
        auto_resolved: Set(false),
        affected_service_ids: Set(serde_json::json!([new.monitor.service_id])),
        created_by_user_id: Set(None),
        created_at: Set(new.opened_at),
        updated_at: Set(new.opened_at),
        resolved_at: Set(None),
    }
    .insert(&txn)
    .await?;

    insert_update(
        &txn,
        saved.id,
        &format!(
            "Auto-created after monitor {} reported {}.",
            new.monitor.name, new.verdict
        ),
        new.opened_at,
    )
    .await?;

    txn.commit().await?;
    Ok(saved)
}

/// Raises severity on an open incident and records why.
pub async fn escalate(
    db: &DatabaseConnection,
    incident: incident::Model,
    severity: IncidentSeverity,
    message: &str,
    at: DateTime<Utc>,
) -> Result<incident::Model, DbErr> {
    let txn = db.begin().await?;
    let incident_id = incident.id;

    let mut active: incident::ActiveModel = incident.into();
    active.severity = Set(severity);
    active.updated_at = Set(at);
    let updated = active.update(&txn).await?;

    insert_update(&txn, incident_id, message, at).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Moves an incident between OPEN and MONITORING, optionally raising
/// severity when the reopening verdict was worse than anything seen before.
pub async fn shift_status(
    db: &DatabaseConnection,
    incident: incident::Model,
    status: IncidentStatus,
    severity: Option<IncidentSeverity>,
    message: &str,
    at: DateTime<Utc>,
) -> Result<incident::Model, DbErr> {
    let txn = db.begin().await?;
    let incident_id = incident.id;

    let mut active: incident::ActiveModel = incident.into();
    active.status = Set(status);
    if let Some(severity) = severity {
        active.severity = Set(severity);
    }
    active.updated_at = Set(at);
    let updated = active.update(&txn).await?;

    insert_update(&txn, incident_id, message, at).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Closes an incident as auto-resolved. `resolved_at` is the timestamp of
/// the confirming verdict, not the wall clock of the write.
pub async fn resolve(
    db: &DatabaseConnection,
    incident: incident::Model,
    message: &str,
    resolved_at: DateTime<Utc>,
) -> Result<incident::Model, DbErr> {
    let txn = db.begin().await?;
    let incident_id = incident.id;

    let mut active: incident::ActiveModel = incident.into();
    active.status = Set(IncidentStatus::Resolved);
    active.auto_resolved = Set(true);
    active.resolved_at = Set(Some(resolved_at));
    active.updated_at = Set(resolved_at);
    let updated = active.update(&txn).await?;

    insert_update(&txn, incident_id, message, resolved_at).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Appends a standalone informational update (no state change).
pub async fn append_update(
    db: &DatabaseConnection,
    incident_id: Uuid,
    message: &str,
) -> Result<incident_update::Model, DbErr> {
    insert_update(db, incident_id, message, Utc::now()).await
}

/// Unions a service id into `affected_service_ids`. Idempotent.
pub async fn add_affected_service(
    db: &DatabaseConnection,
    incident: incident::Model,
    service_id: Uuid,
) -> Result<incident::Model, DbErr> {
    let mut ids: Vec<Uuid> =
        serde_json::from_value(incident.affected_service_ids.clone()).unwrap_or_default();
    if ids.contains(&service_id) {
        return Ok(incident);
    }
    ids.push(service_id);

    let mut active: incident::ActiveModel = incident.into();
    active.affected_service_ids = Set(serde_json::to_value(&ids)
        .map_err(|e| DbErr::Custom(format!("Failed to encode affected service ids: {e}")))?);
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

async fn insert_update<C: ConnectionTrait>(
    conn: &C,
    incident_id: Uuid,
    message: &str,
    at: DateTime<Utc>,
) -> Result<incident_update::Model, DbErr> {
    incident_update::ActiveModel {
        id: Set(Uuid::new_v4()),
        incident_id: Set(incident_id),
        message: Set(message.to_string()),
        created_by: Set(None),
        created_at: Set(at),
    }
    .insert(conn)
    .await
}
