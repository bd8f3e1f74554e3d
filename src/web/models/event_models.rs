//! Events pushed to real-time subscribers and the full-state snapshot used
//! for reconciliation after a reconnect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::entities::{incident, monitoring_result, service};
use crate::db::enums::{IncidentSeverity, MonitorStatus, ServiceStatus};

/// One event on the fan-out channel. Flat structured payloads; delivery is
/// at-most-once per subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WsEvent {
    MonitorResult(MonitorResultEvent),
    ServiceStatusChanged(ServiceStatusChangedEvent),
    IncidentEvent(IncidentEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResultEvent {
    pub monitor_id: Uuid,
    pub status: MonitorStatus,
    pub response_time_ms: Option<i32>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusChangedEvent {
    pub service_id: Uuid,
    pub old_status: ServiceStatus,
    pub new_status: ServiceStatus,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEvent {
    pub incident_id: Uuid,
    pub transition: IncidentTransition,
    pub severity: IncidentSeverity,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentTransition {
    Created,
    Escalated,
    Updated,
    Monitoring,
    Reopened,
    Resolved,
}

/// Everything a reconnecting subscriber needs to resynchronize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub services: Vec<ServiceSnapshot>,
    pub open_incidents: Vec<incident::Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub service: service::Model,
    /// Latest result per active monitor of the service.
    pub latest_results: Vec<monitoring_result::Model>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tagged_envelope() {
        let event = WsEvent::ServiceStatusChanged(ServiceStatusChangedEvent {
            service_id: Uuid::nil(),
            old_status: ServiceStatus::Operational,
            new_status: ServiceStatus::Outage,
            changed_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "service_status_changed");
        assert_eq!(json["payload"]["oldStatus"], "OPERATIONAL");
        assert_eq!(json["payload"]["newStatus"], "OUTAGE");
    }

    #[test]
    fn incident_transitions_use_snake_case() {
        let json = serde_json::to_value(IncidentTransition::Reopened).unwrap();
        assert_eq!(json, "reopened");
    }
}
