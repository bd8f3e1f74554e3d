//! Fan-out of engine state changes to all live subscribers.
//!
//! Delivery is best-effort and at-most-once per subscriber: there is no
//! replay, a disconnected subscriber reconciles via the snapshot endpoint.
//! Publishing never blocks or fails the triggering write path.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::db::entities::monitoring_result;
use crate::db::enums::{IncidentSeverity, ServiceStatus};
use crate::web::models::event_models::{
    IncidentEvent, IncidentTransition, MonitorResultEvent, ServiceStatusChangedEvent, WsEvent,
};

#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<WsEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.tx.subscribe()
    }

    pub fn publish_monitor_result(&self, result: &monitoring_result::Model) {
        self.publish(WsEvent::MonitorResult(MonitorResultEvent {
            monitor_id: result.monitor_id,
            status: result.status,
            response_time_ms: result.response_time_ms,
            checked_at: result.checked_at,
        }));
    }

    pub fn publish_service_status_change(
        &self,
        service_id: Uuid,
        old_status: ServiceStatus,
        new_status: ServiceStatus,
        changed_at: DateTime<Utc>,
    ) {
        self.publish(WsEvent::ServiceStatusChanged(ServiceStatusChangedEvent {
            service_id,
            old_status,
            new_status,
            changed_at,
        }));
    }

    pub fn publish_incident_event(
        &self,
        incident_id: Uuid,
        transition: IncidentTransition,
        severity: IncidentSeverity,
        occurred_at: DateTime<Utc>,
    ) {
        self.publish(WsEvent::IncidentEvent(IncidentEvent {
            incident_id,
            transition,
            severity,
            occurred_at,
        }));
    }

    fn publish(&self, event: WsEvent) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        if let Err(e) = self.tx.send(event) {
            // The last subscriber raced away between the count check and the
            // send; it is noisy, so log low.
            debug!(error = %e, "Failed to broadcast event (no subscribers?).");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::MonitorStatus;

    fn sample_result() -> monitoring_result::Model {
        monitoring_result::Model {
            id: Uuid::new_v4(),
            monitor_id: Uuid::new_v4(),
            checked_at: Utc::now(),
            status: MonitorStatus::Up,
            response_time_ms: Some(120),
            http_status_code: Some(200),
            error: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let broadcaster = EventBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        let result = sample_result();
        broadcaster.publish_monitor_result(&result);

        match rx.recv().await.unwrap() {
            WsEvent::MonitorResult(event) => {
                assert_eq!(event.monitor_id, result.monitor_id);
                assert_eq!(event.status, MonitorStatus::Up);
                assert_eq!(event.response_time_ms, Some(120));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_no_op() {
        let broadcaster = EventBroadcaster::new(8);
        // Must not block or panic with nobody listening.
        broadcaster.publish_monitor_result(&sample_result());
        broadcaster.publish_service_status_change(
            Uuid::new_v4(),
            ServiceStatus::Operational,
            ServiceStatus::Outage,
            Utc::now(),
        );
    }

    #[tokio::test]
    async fn each_subscriber_gets_its_own_copy() {
        let broadcaster = EventBroadcaster::new(8);
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        broadcaster.publish_incident_event(
            Uuid::new_v4(),
            IncidentTransition::Created,
            IncidentSeverity::High,
            Utc::now(),
        );

        assert!(matches!(rx1.recv().await.unwrap(), WsEvent::IncidentEvent(_)));
        assert!(matches!(rx2.recv().await.unwrap(), WsEvent::IncidentEvent(_)));
    }
}
