use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, SqlErr, Statement};
use sea_orm::{ConnectionTrait, EntityTrait, Set};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::db::entities::{monitoring_result, prelude::*};
use crate::db::enums::MonitorStatus;

const INSERT_RETRIES: u32 = 3;
const INSERT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Inserts one append-only monitoring result.
///
/// The insert races against monitor deletion: the row is skipped when the
/// monitor no longer exists, and foreign-key violations are retried with a
/// doubling backoff before the result is dropped for this tick. Returns
/// `None` when the row was not written.
pub async fn insert_result(
    db: &DatabaseConnection,
    monitor_id: Uuid,
    checked_at: DateTime<Utc>,
    status: MonitorStatus,
    response_time_ms: Option<i32>,
    http_status_code: Option<i32>,
    error: Option<String>,
) -> Result<Option<monitoring_result::Model>, DbErr> {
    if Monitor::find_by_id(monitor_id).one(db).await?.is_none() {
        warn!(monitor_id = %monitor_id, "Skipping result insert: monitor does not exist.");
        return Ok(None);
    }

    let row = monitoring_result::ActiveModel {
        id: Set(Uuid::new_v4()),
        monitor_id: Set(monitor_id),
        checked_at: Set(checked_at),
        status: Set(status),
        response_time_ms: Set(response_time_ms),
        http_status_code: Set(http_status_code),
        error: Set(error),
    };

    let mut delay = INSERT_RETRY_DELAY;
    for attempt in 1..=INSERT_RETRIES {
        match row.clone().insert(db).await {
            Ok(model) => return Ok(Some(model)),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::ForeignKeyConstraintViolation(_))) => {
                warn!(
                    monitor_id = %monitor_id,
                    attempt,
                    retries = INSERT_RETRIES,
                    "Foreign-key violation inserting monitoring result; retrying."
                );
                if attempt < INSERT_RETRIES {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
            Err(e) => return Err(e),
        }
    }

    warn!(monitor_id = %monitor_id, "Giving up on monitoring result after retries.");
    Ok(None)
}

/// Latest result per active monitor of the given service, for worst-wins
/// status aggregation.
pub async fn latest_results_for_service(
    db: &DatabaseConnection,
    service_id: Uuid,
) -> Result<Vec<monitoring_result::Model>, DbErr> {
    MonitoringResult::find()
        .from_raw_sql(Statement::from_sql_and_values(
            db.get_database_backend(),
            r#"
            SELECT DISTINCT ON (r.monitor_id) r.*
            FROM monitoring_results r
            JOIN monitors m ON m.id = r.monitor_id
            WHERE m.service_id = $1 AND m.active = TRUE
            ORDER BY r.monitor_id, r.checked_at DESC
            "#,
            [service_id.into()],
        ))
        .all(db)
        .await
}
