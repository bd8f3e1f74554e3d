//! Monitor scheduler: owns the ready queue and timing decisions, reconciles
//! the live monitor set against persistence every dispatch cycle, and runs
//! probes as bounded concurrent tasks.
//!
//! Per monitor there is at most one in-flight probe (an atomic check-and-set
//! on the in-flight map), so verdicts reach the incident lifecycle and the
//! aggregator strictly in probe-completion order. Across monitors no
//! ordering is guaranteed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use reqwest::Client;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::entities::monitor;
use crate::db::services::{monitor_service, monitoring_result_service};
use crate::server::event_broadcaster::EventBroadcaster;

use super::incident_manager::IncidentManager;
use super::prober::ProbeOutcome;
use super::{aggregator, classifier, prober};

const DISPATCH_TICK: Duration = Duration::from_secs(1);
const COMPLETION_BUFFER: usize = 256;

/// Process-scoped scheduler state shared with probe tasks: the live monitor
/// set, the per-monitor in-flight guards, and the global probe cap. Defined
/// startup (load active monitors) and shutdown (drain, stop dispatch) are
/// owned by [`MonitorScheduler::run`].
#[derive(Debug)]
pub struct EngineState {
    monitors: DashMap<Uuid, monitor::Model>,
    in_flight: DashMap<Uuid, ()>,
    probe_permits: Arc<Semaphore>,
}

impl EngineState {
    pub fn new(max_concurrent_probes: usize) -> Arc<Self> {
        Arc::new(Self {
            monitors: DashMap::new(),
            in_flight: DashMap::new(),
            probe_permits: Arc::new(Semaphore::new(max_concurrent_probes.max(1))),
        })
    }

    fn monitor(&self, id: &Uuid) -> Option<monitor::Model> {
        self.monitors.get(id).map(|entry| entry.value().clone())
    }

    fn is_active(&self, id: &Uuid) -> bool {
        self.monitors.contains_key(id)
    }

    /// Atomic check-and-set: returns false while a probe is outstanding,
    /// even if a dispatch cycle overlaps a slow probe.
    fn begin_probe(&self, id: Uuid) -> bool {
        self.in_flight.insert(id, ()).is_none()
    }

    fn finish_probe(&self, id: &Uuid) {
        self.in_flight.remove(id);
    }
}

/// Min-heap entry: the queue is ordered by due time, earliest first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    due_at: DateTime<Utc>,
    monitor_id: Uuid,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.monitor_id.cmp(&self.monitor_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct ReadyQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl ReadyQueue {
    fn schedule(&mut self, monitor_id: Uuid, due_at: DateTime<Utc>) {
        self.heap.push(QueueEntry { due_at, monitor_id });
    }

    /// Pops the next monitor whose due time has elapsed, earliest first.
    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<Uuid> {
        if self.heap.peek().is_some_and(|entry| entry.due_at <= now) {
            self.heap.pop().map(|entry| entry.monitor_id)
        } else {
            None
        }
    }
}

struct ProbeCompletion {
    monitor_id: Uuid,
    completed_at: DateTime<Utc>,
}

/// Everything a probe task needs; cloned per dispatch.
#[derive(Clone)]
struct ProbeContext {
    db: DatabaseConnection,
    state: Arc<EngineState>,
    broadcaster: EventBroadcaster,
    incidents: Arc<IncidentManager>,
    client: Client,
    completion_tx: mpsc::Sender<ProbeCompletion>,
}

pub struct MonitorScheduler {
    db: DatabaseConnection,
    state: Arc<EngineState>,
    broadcaster: EventBroadcaster,
    incidents: Arc<IncidentManager>,
    client: Client,
    queue: ReadyQueue,
}

impl MonitorScheduler {
    pub fn new(
        db: DatabaseConnection,
        state: Arc<EngineState>,
        broadcaster: EventBroadcaster,
        incidents: Arc<IncidentManager>,
    ) -> Self {
        Self {
            db,
            state,
            broadcaster,
            incidents,
            client: prober::build_client(),
            queue: ReadyQueue::default(),
        }
    }

    /// The coordinating loop. Runs until the shutdown signal flips, then
    /// stops dispatching and drains in-flight probes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let (completion_tx, mut completion_rx) =
            mpsc::channel::<ProbeCompletion>(COMPLETION_BUFFER);
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut task_monitors: HashMap<tokio::task::Id, Uuid> = HashMap::new();

        let mut tick = interval(DISPATCH_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if let Err(e) = self.reconcile().await {
            error!(error = %e, "Failed to load the monitor set at startup; will retry each cycle.");
        }
        info!(
            monitor_count = self.state.monitors.len(),
            "Monitor scheduler started."
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "Failed to reconcile monitor set; keeping the previous set.");
                    }
                    self.dispatch_due(&completion_tx, &mut tasks, &mut task_monitors);
                }
                Some(done) = completion_rx.recv() => {
                    self.requeue(done);
                }
                Some(joined) = tasks.join_next_with_id() => {
                    match joined {
                        Ok((task_id, ())) => {
                            task_monitors.remove(&task_id);
                        }
                        Err(join_error) => {
                            // A panicking probe task must not take down the
                            // loop or starve its monitor.
                            if let Some(monitor_id) = task_monitors.remove(&join_error.id()) {
                                error!(monitor_id = %monitor_id, error = %join_error, "Probe task failed; rescheduling monitor.");
                                self.state.finish_probe(&monitor_id);
                                self.requeue(ProbeCompletion {
                                    monitor_id,
                                    completed_at: Utc::now(),
                                });
                            } else {
                                error!(error = %join_error, "Probe task failed.");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Monitor scheduler stopping; draining in-flight probes.");
        self.state.probe_permits.close();
        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
                // Keep draining completions so finishing tasks never block
                // on a full channel.
                _ = completion_rx.recv() => {}
            }
        }
        info!("Monitor scheduler stopped.");
    }

    /// Re-reads the authoritative monitor set: picks up new/edited monitors
    /// and drops deactivated/deleted ones so any in-flight probe's result is
    /// discarded rather than acted upon.
    async fn reconcile(&mut self) -> Result<(), DbErr> {
        let desired: HashMap<Uuid, monitor::Model> = monitor_service::list_active_monitors(&self.db)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let stale: Vec<Uuid> = self
            .state
            .monitors
            .iter()
            .filter(|entry| !desired.contains_key(entry.key()))
            .map(|entry| *entry.key())
            .collect();
        for monitor_id in stale {
            self.state.monitors.remove(&monitor_id);
            self.incidents.forget(&monitor_id);
            info!(monitor_id = %monitor_id, "Monitor removed from schedule.");
        }

        for (monitor_id, monitor) in desired {
            let is_new = self.state.monitors.insert(monitor_id, monitor).is_none();
            if is_new {
                self.queue.schedule(monitor_id, Utc::now());
                info!(monitor_id = %monitor_id, "Monitor scheduled.");
            }
        }
        Ok(())
    }

    fn dispatch_due(
        &mut self,
        completion_tx: &mpsc::Sender<ProbeCompletion>,
        tasks: &mut JoinSet<()>,
        task_monitors: &mut HashMap<tokio::task::Id, Uuid>,
    ) {
        let now = Utc::now();
        while let Some(monitor_id) = self.queue.pop_due(now) {
            // Deactivated while queued: the stale entry is simply dropped.
            let Some(monitor) = self.state.monitor(&monitor_id) else {
                continue;
            };
            if !self.state.begin_probe(monitor_id) {
                debug!(monitor_id = %monitor_id, "Probe still outstanding; skipping dispatch.");
                continue;
            }

            let ctx = ProbeContext {
                db: self.db.clone(),
                state: self.state.clone(),
                broadcaster: self.broadcaster.clone(),
                incidents: self.incidents.clone(),
                client: self.client.clone(),
                completion_tx: completion_tx.clone(),
            };
            let handle = tasks.spawn(run_probe(ctx, monitor));
            task_monitors.insert(handle.id(), monitor_id);
        }
    }

    /// Intervals are measured from probe completion, not from the previous
    /// due time, so a slow target never compounds into back-to-back probes.
    fn requeue(&mut self, done: ProbeCompletion) {
        if let Some(monitor) = self.state.monitor(&done.monitor_id) {
            let interval = ChronoDuration::seconds(i64::from(monitor.interval_seconds.max(1)));
            self.queue.schedule(done.monitor_id, done.completed_at + interval);
        }
    }
}

async fn run_probe(ctx: ProbeContext, monitor: monitor::Model) {
    let permit = match ctx.state.probe_permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            // Semaphore closed: shutting down.
            ctx.state.finish_probe(&monitor.id);
            return;
        }
    };
    let outcome = prober::execute(&ctx.client, &monitor).await;
    drop(permit);

    let checked_at = Utc::now();
    if ctx.state.is_active(&monitor.id) {
        if let Err(e) = process_result(&ctx, &monitor, &outcome, checked_at).await {
            // Dropped for this tick; the next scheduled interval is the retry.
            error!(monitor_id = %monitor.id, error = %e, "Failed to process probe result.");
        }
    } else {
        debug!(monitor_id = %monitor.id, "Discarding probe result for deactivated monitor.");
    }

    ctx.state.finish_probe(&monitor.id);
    let _ = ctx
        .completion_tx
        .send(ProbeCompletion {
            monitor_id: monitor.id,
            completed_at: Utc::now(),
        })
        .await;
}

/// Persist the result, feed the incident lifecycle and the service
/// aggregator, and broadcast — the synchronous spine behind every probe.
async fn process_result(
    ctx: &ProbeContext,
    monitor: &monitor::Model,
    outcome: &ProbeOutcome,
    checked_at: DateTime<Utc>,
) -> Result<(), DbErr> {
    let verdict = classifier::classify(outcome, monitor.degraded_threshold_ms);
    let (response_time_ms, http_status_code, error) = match outcome {
        ProbeOutcome::Completed {
            latency_ms,
            http_status,
        } => {
            let error = if !(200..400).contains(http_status) {
                Some(format!("HTTP error {http_status}"))
            } else {
                None
            };
            (Some(*latency_ms), Some(i32::from(*http_status)), error)
        }
        ProbeOutcome::Failed { error } => (None, None, Some(error.clone())),
    };

    info!(
        monitor_id = %monitor.id,
        name = %monitor.name,
        url = %monitor.url,
        verdict = %verdict,
        response_time_ms = ?response_time_ms,
        "Probe completed."
    );

    let Some(result) = monitoring_result_service::insert_result(
        &ctx.db,
        monitor.id,
        checked_at,
        verdict,
        response_time_ms,
        http_status_code,
        error,
    )
    .await?
    else {
        // Monitor vanished or retries exhausted; the event is dropped for
        // this tick and the loop proceeds.
        return Ok(());
    };
    ctx.broadcaster.publish_monitor_result(&result);

    ctx.incidents.handle_verdict(monitor, verdict, checked_at).await?;

    let changed =
        aggregator::recompute_service_status(&ctx.db, &ctx.broadcaster, monitor.service_id).await?;
    if changed.is_some() {
        ctx.incidents.note_service_status_change(monitor).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn ready_queue_pops_in_due_order() {
        let mut queue = ReadyQueue::default();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queue.schedule(a, at(30));
        queue.schedule(b, at(10));
        queue.schedule(c, at(20));

        assert_eq!(queue.pop_due(at(25)), Some(b));
        assert_eq!(queue.pop_due(at(25)), Some(c));
        // `a` is not due yet.
        assert_eq!(queue.pop_due(at(25)), None);
        assert_eq!(queue.pop_due(at(30)), Some(a));
        assert_eq!(queue.pop_due(at(100)), None);
    }

    #[test]
    fn ready_queue_entry_due_exactly_now_is_due() {
        let mut queue = ReadyQueue::default();
        let id = Uuid::new_v4();
        queue.schedule(id, at(10));
        assert_eq!(queue.pop_due(at(10)), Some(id));
    }

    #[test]
    fn in_flight_guard_blocks_second_probe() {
        let state = EngineState::new(4);
        let id = Uuid::new_v4();
        assert!(state.begin_probe(id));
        // A second dispatch while the probe is outstanding must be refused.
        assert!(!state.begin_probe(id));
        state.finish_probe(&id);
        assert!(state.begin_probe(id));
    }

    #[test]
    fn in_flight_guards_are_per_monitor() {
        let state = EngineState::new(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(state.begin_probe(a));
        assert!(state.begin_probe(b));
    }
}
