//! Pure verdict classification for a single probe outcome.

use crate::db::enums::MonitorStatus;

use super::prober::ProbeOutcome;

/// HTTP statuses in this range count as a successful answer; 3xx is
/// deliberately included because probes do not follow redirects.
const SUCCESS_RANGE: std::ops::Range<u16> = 200..400;

/// Maps a raw probe outcome and the monitor's degraded threshold to a
/// verdict. Stateless: identical inputs always yield identical verdicts,
/// so historical results can be re-classified at any time.
pub fn classify(outcome: &ProbeOutcome, degraded_threshold_ms: i32) -> MonitorStatus {
    match outcome {
        ProbeOutcome::Failed { .. } => MonitorStatus::Down,
        ProbeOutcome::Completed {
            latency_ms,
            http_status,
        } => {
            if !SUCCESS_RANGE.contains(http_status) {
                MonitorStatus::Down
            } else if *latency_ms > degraded_threshold_ms {
                MonitorStatus::Degraded
            } else {
                MonitorStatus::Up
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(latency_ms: i32, http_status: u16) -> ProbeOutcome {
        ProbeOutcome::Completed {
            latency_ms,
            http_status,
        }
    }

    #[test]
    fn fast_success_is_up() {
        assert_eq!(classify(&completed(120, 200), 500), MonitorStatus::Up);
    }

    #[test]
    fn latency_at_threshold_is_still_up() {
        assert_eq!(classify(&completed(500, 200), 500), MonitorStatus::Up);
    }

    #[test]
    fn slow_success_is_degraded() {
        assert_eq!(classify(&completed(700, 200), 500), MonitorStatus::Degraded);
    }

    #[test]
    fn redirects_count_as_success() {
        assert_eq!(classify(&completed(50, 301), 500), MonitorStatus::Up);
        assert_eq!(classify(&completed(900, 302), 500), MonitorStatus::Degraded);
    }

    #[test]
    fn error_statuses_are_down_regardless_of_latency() {
        assert_eq!(classify(&completed(10, 404), 500), MonitorStatus::Down);
        assert_eq!(classify(&completed(10, 500), 500), MonitorStatus::Down);
        assert_eq!(classify(&completed(10, 199), 500), MonitorStatus::Down);
        assert_eq!(classify(&completed(10, 400), 500), MonitorStatus::Down);
    }

    #[test]
    fn transport_failure_is_down() {
        let outcome = ProbeOutcome::Failed {
            error: "timeout".to_string(),
        };
        assert_eq!(classify(&outcome, 500), MonitorStatus::Down);
    }
}
