//! Worst-wins service status derivation from the latest monitor verdicts.

use sea_orm::{DatabaseConnection, DbErr};
use tracing::info;
use uuid::Uuid;

use crate::db::enums::{MonitorStatus, ServiceStatus};
use crate::db::services::{monitoring_result_service, service_service};
use crate::server::event_broadcaster::EventBroadcaster;

/// Worst-wins fold: any DOWN makes the service an OUTAGE, otherwise any
/// DEGRADED makes it DEGRADED, otherwise it is OPERATIONAL. A service with
/// no reporting monitors is OPERATIONAL.
pub fn aggregate<'a, I>(verdicts: I) -> ServiceStatus
where
    I: IntoIterator<Item = &'a MonitorStatus>,
{
    let mut status = ServiceStatus::Operational;
    for verdict in verdicts {
        match verdict {
            MonitorStatus::Down => return ServiceStatus::Outage,
            MonitorStatus::Degraded => status = ServiceStatus::Degraded,
            MonitorStatus::Up => {}
        }
    }
    status
}

/// Recomputes a service's derived status from its monitors' latest verdicts
/// and persists + broadcasts only when the status actually changed.
/// Services under a MAINTENANCE override are left untouched.
///
/// Returns the `(old, new)` pair on change, `None` otherwise; idempotent
/// for unchanged inputs.
pub async fn recompute_service_status(
    db: &DatabaseConnection,
    broadcaster: &EventBroadcaster,
    service_id: Uuid,
) -> Result<Option<(ServiceStatus, ServiceStatus)>, DbErr> {
    let Some(service) = service_service::get_service(db, service_id).await? else {
        return Ok(None);
    };
    if service.status == ServiceStatus::Maintenance {
        return Ok(None);
    }

    let latest = monitoring_result_service::latest_results_for_service(db, service_id).await?;
    let new_status = aggregate(latest.iter().map(|r| &r.status));
    if new_status == service.status {
        return Ok(None);
    }

    let old_status = service.status;
    let updated = service_service::set_status(db, service, new_status).await?;
    info!(
        service_id = %service_id,
        old_status = %old_status,
        new_status = %new_status,
        "Service status changed."
    );
    broadcaster.publish_service_status_change(service_id, old_status, new_status, updated.updated_at);
    Ok(Some((old_status, new_status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use MonitorStatus::*;

    #[test]
    fn no_monitors_is_operational() {
        assert_eq!(
            aggregate(std::iter::empty::<&MonitorStatus>()),
            ServiceStatus::Operational
        );
    }

    #[test]
    fn all_up_is_operational() {
        assert_eq!(aggregate([Up, Up, Up].iter()), ServiceStatus::Operational);
    }

    #[test]
    fn any_down_wins_over_everything() {
        // Scenario E: one DOWN and one UP monitor yields OUTAGE regardless
        // of which reported last.
        assert_eq!(aggregate([Down, Up].iter()), ServiceStatus::Outage);
        assert_eq!(aggregate([Up, Down].iter()), ServiceStatus::Outage);
        assert_eq!(aggregate([Degraded, Down].iter()), ServiceStatus::Outage);
    }

    #[test]
    fn degraded_without_down_is_degraded() {
        assert_eq!(aggregate([Up, Degraded, Up].iter()), ServiceStatus::Degraded);
    }
}
