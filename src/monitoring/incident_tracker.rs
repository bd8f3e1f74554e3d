//! Per-monitor incident state machine, kept as plain data so verdict
//! sequences can be fed to it directly in tests.

use crate::db::enums::{IncidentSeverity, MonitorStatus};

/// Lifecycle position of the (at most one) open auto incident for a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No open incident.
    Idle,
    /// Incident open; `worst` is the worst verdict observed during it.
    Open {
        severity: IncidentSeverity,
        worst: MonitorStatus,
    },
    /// Tentative recovery: counting consecutive UP verdicts toward the
    /// confirmation window.
    Monitoring {
        severity: IncidentSeverity,
        worst: MonitorStatus,
        consecutive_up: u32,
    },
}

/// A state-changing observation the driver must persist and broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened { severity: IncidentSeverity },
    Escalated { severity: IncidentSeverity },
    /// Still unhealthy, severity unchanged, but the verdict kind moved
    /// (e.g. DOWN to DEGRADED) — worth a narrative entry.
    VerdictShifted,
    /// First UP after a run of unhealthy verdicts.
    RecoveryStarted,
    /// Unhealthy verdict during the confirmation window; the counter is
    /// reset and the incident goes back to OPEN.
    Reopened {
        severity: IncidentSeverity,
        escalated: bool,
    },
    /// Confirmation window completed; the incident auto-resolves.
    Resolved,
}

#[derive(Debug, Clone)]
pub struct IncidentTracker {
    state: TrackerState,
    last_verdict: Option<MonitorStatus>,
    confirmation_checks: u32,
}

impl IncidentTracker {
    pub fn new(confirmation_checks: u32) -> Self {
        Self::resume(TrackerState::Idle, confirmation_checks)
    }

    /// Rebuilds a tracker from persisted incident state after a restart.
    /// The consecutive-UP counter always restarts at zero: recovery must be
    /// observed afresh by this process.
    pub fn resume(state: TrackerState, confirmation_checks: u32) -> Self {
        Self {
            state,
            last_verdict: None,
            confirmation_checks: confirmation_checks.max(1),
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn last_verdict(&self) -> Option<MonitorStatus> {
        self.last_verdict
    }

    /// Feeds one verdict and returns the resulting transition, if any.
    /// Verdicts for one monitor arrive strictly in probe-completion order.
    pub fn observe(&mut self, verdict: MonitorStatus) -> Option<Transition> {
        let previous = self.last_verdict.replace(verdict);

        match self.state {
            TrackerState::Idle => match verdict {
                MonitorStatus::Up => None,
                unhealthy => {
                    let severity = opening_severity(unhealthy);
                    self.state = TrackerState::Open {
                        severity,
                        worst: unhealthy,
                    };
                    Some(Transition::Opened { severity })
                }
            },

            TrackerState::Open { severity, worst } => match verdict {
                MonitorStatus::Up => {
                    if self.confirmation_checks <= 1 {
                        self.state = TrackerState::Idle;
                        Some(Transition::Resolved)
                    } else {
                        self.state = TrackerState::Monitoring {
                            severity,
                            worst,
                            consecutive_up: 1,
                        };
                        Some(Transition::RecoveryStarted)
                    }
                }
                unhealthy if unhealthy > worst => {
                    self.state = TrackerState::Open {
                        severity: IncidentSeverity::Critical,
                        worst: unhealthy,
                    };
                    Some(Transition::Escalated {
                        severity: IncidentSeverity::Critical,
                    })
                }
                unhealthy => {
                    if previous != Some(unhealthy) {
                        Some(Transition::VerdictShifted)
                    } else {
                        None
                    }
                }
            },

            TrackerState::Monitoring {
                severity,
                worst,
                consecutive_up,
            } => match verdict {
                MonitorStatus::Up => {
                    let consecutive_up = consecutive_up + 1;
                    if consecutive_up >= self.confirmation_checks {
                        self.state = TrackerState::Idle;
                        Some(Transition::Resolved)
                    } else {
                        self.state = TrackerState::Monitoring {
                            severity,
                            worst,
                            consecutive_up,
                        };
                        None
                    }
                }
                unhealthy => {
                    let escalated = unhealthy > worst;
                    let severity = if escalated {
                        IncidentSeverity::Critical
                    } else {
                        severity
                    };
                    self.state = TrackerState::Open {
                        severity,
                        worst: worst.max(unhealthy),
                    };
                    Some(Transition::Reopened {
                        severity,
                        escalated,
                    })
                }
            },
        }
    }
}

fn opening_severity(verdict: MonitorStatus) -> IncidentSeverity {
    match verdict {
        MonitorStatus::Degraded => IncidentSeverity::Medium,
        _ => IncidentSeverity::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IncidentSeverity::*;
    use MonitorStatus::*;

    #[test]
    fn healthy_monitor_never_opens() {
        let mut tracker = IncidentTracker::new(3);
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn degraded_opens_medium_then_down_escalates_then_sustained_up_resolves() {
        // Scenarios B, C, D back to back.
        let mut tracker = IncidentTracker::new(3);
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(
            tracker.observe(Degraded),
            Some(Transition::Opened { severity: Medium })
        );
        assert_eq!(
            tracker.observe(Down),
            Some(Transition::Escalated { severity: Critical })
        );
        assert_eq!(tracker.observe(Up), Some(Transition::RecoveryStarted));
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(tracker.observe(Up), Some(Transition::Resolved));
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn down_opens_high_and_never_escalates_on_repeat() {
        let mut tracker = IncidentTracker::new(3);
        assert_eq!(
            tracker.observe(Down),
            Some(Transition::Opened { severity: High })
        );
        assert_eq!(tracker.observe(Down), None);
        // Softer but still unhealthy: severity stays, the shift is noted.
        assert_eq!(tracker.observe(Degraded), Some(Transition::VerdictShifted));
        assert_eq!(tracker.observe(Degraded), None);
        assert_eq!(
            tracker.state(),
            TrackerState::Open {
                severity: High,
                worst: Down
            }
        );
    }

    #[test]
    fn unhealthy_during_monitoring_resets_the_window() {
        let mut tracker = IncidentTracker::new(3);
        tracker.observe(Down);
        assert_eq!(tracker.observe(Up), Some(Transition::RecoveryStarted));
        assert_eq!(tracker.observe(Up), None);
        // Relapse one verdict short of confirmation.
        assert_eq!(
            tracker.observe(Down),
            Some(Transition::Reopened {
                severity: High,
                escalated: false
            })
        );
        // The full window is required again.
        assert_eq!(tracker.observe(Up), Some(Transition::RecoveryStarted));
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(tracker.observe(Up), Some(Transition::Resolved));
    }

    #[test]
    fn relapse_worse_than_basis_escalates_on_reopen() {
        let mut tracker = IncidentTracker::new(3);
        tracker.observe(Degraded);
        tracker.observe(Up);
        assert_eq!(
            tracker.observe(Down),
            Some(Transition::Reopened {
                severity: Critical,
                escalated: true
            })
        );
        assert_eq!(
            tracker.state(),
            TrackerState::Open {
                severity: Critical,
                worst: Down
            }
        );
    }

    #[test]
    fn confirmation_of_one_resolves_on_first_up() {
        let mut tracker = IncidentTracker::new(1);
        tracker.observe(Down);
        assert_eq!(tracker.observe(Up), Some(Transition::Resolved));
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn resumed_monitoring_state_needs_a_full_window() {
        let mut tracker = IncidentTracker::resume(
            TrackerState::Monitoring {
                severity: High,
                worst: Down,
                consecutive_up: 0,
            },
            3,
        );
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(tracker.observe(Up), Some(Transition::Resolved));
    }

    #[test]
    fn exactly_k_consecutive_ups_are_required() {
        let mut tracker = IncidentTracker::new(4);
        tracker.observe(Down);
        assert_eq!(tracker.observe(Up), Some(Transition::RecoveryStarted));
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(tracker.observe(Up), None);
        assert_eq!(tracker.observe(Up), Some(Transition::Resolved));
    }
}
