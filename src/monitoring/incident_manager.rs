//! Drives incident rows from classified verdicts.
//!
//! The pure state machine lives in [`super::incident_tracker`]; this module
//! applies its transitions through the persistence services, keeps one
//! tracker per monitor, and rebuilds tracker state from persisted incidents
//! after a restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sea_orm::{DatabaseConnection, DbErr};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::entities::monitor;
use crate::db::enums::{IncidentSeverity, IncidentStatus, MonitorStatus};
use crate::db::services::{incident_service, service_service};
use crate::server::event_broadcaster::EventBroadcaster;
use crate::web::models::event_models::IncidentTransition;

use super::incident_tracker::{IncidentTracker, TrackerState, Transition};

pub struct IncidentManager {
    db: DatabaseConnection,
    broadcaster: EventBroadcaster,
    confirmation_checks: u32,
    trackers: DashMap<Uuid, IncidentTracker>,
}

impl IncidentManager {
    pub fn new(db: DatabaseConnection, broadcaster: EventBroadcaster, confirmation_checks: u32) -> Self {
        Self {
            db,
            broadcaster,
            confirmation_checks,
            trackers: DashMap::new(),
        }
    }

    /// Feeds one verdict for a monitor, in probe-completion order (the
    /// scheduler's single-in-flight guard guarantees no two calls race for
    /// the same monitor).
    pub async fn handle_verdict(
        &self,
        monitor: &monitor::Model,
        verdict: MonitorStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        let mut tracker = match self.trackers.get(&monitor.id) {
            Some(entry) => entry.value().clone(),
            None => self.hydrate(monitor.id).await?,
        };

        let previous = tracker.last_verdict();
        let transition = tracker.observe(verdict);

        let applied = async {
            if let Some(transition) = transition {
                self.apply_transition(monitor, verdict, checked_at, transition)
                    .await?;
            }
            if let Some(previous) = previous {
                if previous != verdict {
                    self.annotate_manual_incidents(monitor, previous, verdict)
                        .await?;
                }
            }
            Ok::<(), DbErr>(())
        }
        .await;

        match applied {
            Ok(()) => {
                self.trackers.insert(monitor.id, tracker);
                Ok(())
            }
            Err(e) => {
                // Drop the tracker so the next verdict re-hydrates from the
                // persisted incident instead of a half-applied state.
                self.trackers.remove(&monitor.id);
                Err(e)
            }
        }
    }

    /// Unions the monitor's service into the open incident's affected set.
    /// Called when this monitor's result changed its service's status.
    pub async fn note_service_status_change(&self, monitor: &monitor::Model) -> Result<(), DbErr> {
        if let Some(incident) =
            incident_service::find_open_auto_incident(&self.db, monitor.id).await?
        {
            incident_service::add_affected_service(&self.db, incident, monitor.service_id).await?;
        }
        Ok(())
    }

    /// Forgets the tracker for a removed monitor.
    pub fn forget(&self, monitor_id: &Uuid) {
        self.trackers.remove(monitor_id);
    }

    async fn hydrate(&self, monitor_id: Uuid) -> Result<IncidentTracker, DbErr> {
        let tracker = match incident_service::find_open_auto_incident(&self.db, monitor_id).await? {
            Some(incident) => {
                // The worst verdict is not persisted; derive a basis from
                // the severity so escalation still only fires on worse news.
                let worst = if incident.severity >= IncidentSeverity::High {
                    MonitorStatus::Down
                } else {
                    MonitorStatus::Degraded
                };
                let state = match incident.status {
                    IncidentStatus::Open => TrackerState::Open {
                        severity: incident.severity,
                        worst,
                    },
                    IncidentStatus::Monitoring => TrackerState::Monitoring {
                        severity: incident.severity,
                        worst,
                        consecutive_up: 0,
                    },
                    IncidentStatus::Resolved => TrackerState::Idle,
                };
                debug!(monitor_id = %monitor_id, incident_id = %incident.id, "Resumed incident tracker from persistence.");
                IncidentTracker::resume(state, self.confirmation_checks)
            }
            None => IncidentTracker::new(self.confirmation_checks),
        };
        Ok(tracker)
    }

    async fn apply_transition(
        &self,
        monitor: &monitor::Model,
        verdict: MonitorStatus,
        checked_at: DateTime<Utc>,
        transition: Transition,
    ) -> Result<(), DbErr> {
        if let Transition::Opened { severity } = transition {
            return self.open_incident(monitor, verdict, severity, checked_at).await;
        }

        let Some(incident) =
            incident_service::find_open_auto_incident(&self.db, monitor.id).await?
        else {
            // The incident disappeared underneath us (deleted externally);
            // nothing to drive.
            warn!(monitor_id = %monitor.id, ?transition, "No open incident found for transition.");
            return Ok(());
        };

        match transition {
            Transition::Opened { .. } => unreachable!("handled above"),

            Transition::Escalated { severity } => {
                let message = format!(
                    "Escalated to {} after monitor {} reported {}.",
                    severity, monitor.name, verdict
                );
                let updated =
                    incident_service::escalate(&self.db, incident, severity, &message, checked_at)
                        .await?;
                info!(incident_id = %updated.id, severity = %severity, "Incident escalated.");
                self.broadcaster.publish_incident_event(
                    updated.id,
                    IncidentTransition::Escalated,
                    updated.severity,
                    checked_at,
                );
            }

            Transition::VerdictShifted => {
                let message = format!("Monitor {} is now reporting {}.", monitor.name, verdict);
                incident_service::append_update(&self.db, incident.id, &message).await?;
                self.broadcaster.publish_incident_event(
                    incident.id,
                    IncidentTransition::Updated,
                    incident.severity,
                    checked_at,
                );
            }

            Transition::RecoveryStarted => {
                let message = format!(
                    "Monitor {} recovered; watching for sustained recovery.",
                    monitor.name
                );
                let updated = incident_service::shift_status(
                    &self.db,
                    incident,
                    IncidentStatus::Monitoring,
                    None,
                    &message,
                    checked_at,
                )
                .await?;
                info!(incident_id = %updated.id, "Incident moved to MONITORING.");
                self.broadcaster.publish_incident_event(
                    updated.id,
                    IncidentTransition::Monitoring,
                    updated.severity,
                    checked_at,
                );
            }

            Transition::Reopened { severity, escalated } => {
                let message = format!(
                    "Monitor {} reported {} during recovery; incident reopened.",
                    monitor.name, verdict
                );
                let updated = incident_service::shift_status(
                    &self.db,
                    incident,
                    IncidentStatus::Open,
                    escalated.then_some(severity),
                    &message,
                    checked_at,
                )
                .await?;
                info!(incident_id = %updated.id, severity = %updated.severity, "Incident reopened.");
                self.broadcaster.publish_incident_event(
                    updated.id,
                    IncidentTransition::Reopened,
                    updated.severity,
                    checked_at,
                );
            }

            Transition::Resolved => {
                let message = format!(
                    "Auto-resolved after {} consecutive healthy checks.",
                    self.confirmation_checks
                );
                let updated =
                    incident_service::resolve(&self.db, incident, &message, checked_at).await?;
                info!(incident_id = %updated.id, monitor_id = %monitor.id, "Incident auto-resolved.");
                self.broadcaster.publish_incident_event(
                    updated.id,
                    IncidentTransition::Resolved,
                    updated.severity,
                    checked_at,
                );
            }
        }

        Ok(())
    }

    async fn open_incident(
        &self,
        monitor: &monitor::Model,
        verdict: MonitorStatus,
        severity: IncidentSeverity,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        // Another writer may have opened one already; the invariant is one
        // open auto incident per monitor, so adopt instead of duplicating.
        if let Some(existing) =
            incident_service::find_open_auto_incident(&self.db, monitor.id).await?
        {
            debug!(incident_id = %existing.id, monitor_id = %monitor.id, "Open incident already exists; adopting.");
            return Ok(());
        }

        let Some(service) = service_service::get_service(&self.db, monitor.service_id).await? else {
            warn!(monitor_id = %monitor.id, "Service missing for monitor; incident not created.");
            return Ok(());
        };

        let incident = incident_service::create_auto_incident(
            &self.db,
            incident_service::NewAutoIncident {
                monitor,
                organization_id: service.organization_id,
                verdict,
                severity,
                opened_at: checked_at,
            },
        )
        .await?;
        info!(
            incident_id = %incident.id,
            monitor_id = %monitor.id,
            severity = %incident.severity,
            "Incident auto-created."
        );
        self.broadcaster.publish_incident_event(
            incident.id,
            IncidentTransition::Created,
            incident.severity,
            checked_at,
        );
        Ok(())
    }

    async fn annotate_manual_incidents(
        &self,
        monitor: &monitor::Model,
        previous: MonitorStatus,
        verdict: MonitorStatus,
    ) -> Result<(), DbErr> {
        let manual = incident_service::find_open_manual_incidents(&self.db, monitor.id).await?;
        for incident in manual {
            let message = format!(
                "Monitor {} status changed from {} to {}.",
                monitor.name, previous, verdict
            );
            incident_service::append_update(&self.db, incident.id, &message).await?;
        }
        Ok(())
    }
}
