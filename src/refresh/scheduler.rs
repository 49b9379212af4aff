//! The refresh loop.
//!
//! A single task drives every dataset, so cycles never overlap: it sleeps
//! until the earliest due dataset (or a manual request), honors that
//! dataset's backoff, runs the cycle under a deadline and records the result.

use crate::config::ScheduleConfig;
use crate::data::DatasetId;
use crate::refresh::backoff::{BackoffPolicy, FailureTracker};
use crate::refresh::fetcher::{FetchError, Fetcher, TaskSpec};
use crate::refresh::store::SnapshotStore;
use crate::utils::{fmt_duration, log_if_slow, wall_time};
use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SLOW_CYCLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);
const FALLBACK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// When a dataset's scheduled cycles fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Interval(Duration),
    /// Once a day at a wall-clock time in a time zone.
    Daily { at: NaiveTime, tz: Tz },
}

impl Schedule {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        match config.daily_at {
            Some(at) => Schedule::Daily {
                at,
                tz: config.timezone,
            },
            // A schedule with neither is rejected by `Config::validate`.
            None => Schedule::Interval(config.every.unwrap_or(FALLBACK_INTERVAL)),
        }
    }

    /// Delay from `now` until the next scheduled trigger.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        match *self {
            Schedule::Interval(every) => every,
            Schedule::Daily { at, tz } => (next_daily(at, tz, now) - now)
                .to_std()
                .unwrap_or(Duration::ZERO),
        }
    }
}

/// First instant strictly after `now` whose local time in `tz` is `at`.
///
/// A time skipped by a DST transition fires an hour later that day.
fn next_daily(at: NaiveTime, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let mut date = now.with_timezone(&tz).date_naive();
    for _ in 0..3 {
        let local = date.and_time(at);
        let candidate = tz
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest());
        if let Some(candidate) = candidate.map(|c| c.with_timezone(&Utc))
            && candidate > now
        {
            return candidate;
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    now + TimeDelta::days(1)
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Startup,
    Scheduled,
    Manual,
}

/// Where a dataset's task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Phase {
    Idle,
    /// Sitting out the backoff before fetching.
    Waiting { until: DateTime<Utc> },
    Fetching { since: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Published { published_at: DateTime<Utc> },
    Failed(FetchError),
    /// Interrupted by shutdown; neither a success nor a failure.
    Cancelled,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Published { .. } => "published",
            CycleOutcome::Failed(_) => "failed",
            CycleOutcome::Cancelled => "cancelled",
        }
    }
}

/// Summary of one finished cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub dataset: DatasetId,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: CycleOutcome,
}

/// Observable state of one dataset's task, shared with the web layer.
#[derive(Debug)]
pub struct TaskMonitor {
    pub dataset: DatasetId,
    pub tracker: FailureTracker,
    phase: watch::Sender<Phase>,
    last_cycle: watch::Sender<Option<Arc<CycleReport>>>,
    next_due: watch::Sender<Option<DateTime<Utc>>>,
    /// Set while a manual refresh is queued or running.
    pub(crate) force_pending: AtomicBool,
}

impl TaskMonitor {
    fn new(dataset: DatasetId, policy: BackoffPolicy) -> Self {
        Self {
            dataset,
            tracker: FailureTracker::new(policy),
            phase: watch::Sender::new(Phase::Idle),
            last_cycle: watch::Sender::new(None),
            next_due: watch::Sender::new(None),
            force_pending: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn last_cycle(&self) -> Option<Arc<CycleReport>> {
        self.last_cycle.borrow().clone()
    }

    pub fn subscribe_cycles(&self) -> watch::Receiver<Option<Arc<CycleReport>>> {
        self.last_cycle.subscribe()
    }

    /// When the next scheduled cycle is due, once the scheduler has started.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        *self.next_due.borrow()
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }
}

/// Per-dataset monitors, indexed by [`DatasetId`].
#[derive(Debug)]
pub struct TaskMonitors {
    tasks: [TaskMonitor; DatasetId::ALL.len()],
}

impl TaskMonitors {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            tasks: DatasetId::ALL.map(|dataset| TaskMonitor::new(dataset, policy)),
        }
    }

    pub fn get(&self, dataset: DatasetId) -> &TaskMonitor {
        &self.tasks[dataset.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskMonitor> {
        self.tasks.iter()
    }
}

/// A dataset's cycle definition plus its trigger schedule.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub spec: TaskSpec,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub cycle_deadline: Duration,
    pub inter_cycle_gap: Duration,
    pub refresh_on_startup: bool,
}

/// A manual refresh waiting for the loop to pick it up.
#[derive(Debug)]
pub(crate) struct ForceRequest {
    pub dataset: DatasetId,
    pub reply: oneshot::Sender<Arc<CycleReport>>,
}

pub struct RefreshScheduler {
    fetcher: Fetcher,
    store: Arc<SnapshotStore>,
    monitors: Arc<TaskMonitors>,
    tasks: Vec<ScheduledTask>,
    settings: SchedulerSettings,
    force_rx: mpsc::Receiver<ForceRequest>,
}

impl RefreshScheduler {
    pub(crate) fn new(
        fetcher: Fetcher,
        store: Arc<SnapshotStore>,
        monitors: Arc<TaskMonitors>,
        tasks: Vec<ScheduledTask>,
        settings: SchedulerSettings,
        force_rx: mpsc::Receiver<ForceRequest>,
    ) -> Self {
        Self {
            fetcher,
            store,
            monitors,
            tasks,
            settings,
            force_rx,
        }
    }

    /// Runs the loop until `shutdown` is cancelled.
    ///
    /// Cancellation interrupts a backoff wait or an in-flight fetch; the
    /// interrupted cycle is reported as cancelled and touches no state.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if self.tasks.is_empty() {
            warn!("Refresh scheduler has no tasks");
            shutdown.cancelled().await;
            return;
        }

        let start = Instant::now();
        let mut due: Vec<Instant> = Vec::with_capacity(self.tasks.len());
        let mut triggers: Vec<Trigger> = Vec::with_capacity(self.tasks.len());
        for (i, task) in self.tasks.iter().enumerate() {
            if self.settings.refresh_on_startup {
                due.push(start + self.settings.inter_cycle_gap * i as u32);
                triggers.push(Trigger::Startup);
            } else {
                due.push(start + task.schedule.next_delay(Utc::now()));
                triggers.push(Trigger::Scheduled);
            }
        }
        self.publish_next_due(&due);
        let mut last_finished: Option<(DatasetId, Instant)> = None;

        info!(
            tasks = self.tasks.len(),
            refresh_on_startup = self.settings.refresh_on_startup,
            "Refresh scheduler started"
        );

        loop {
            let (next, at) = earliest(&due);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(request) = self.force_rx.recv() => {
                    let Some(index) = self.task_index(request.dataset) else {
                        warn!(dataset = %request.dataset, "Manual refresh for an unscheduled dataset");
                        self.monitors.get(request.dataset).force_pending.store(false, Ordering::Release);
                        continue;
                    };

                    if !self.wait_for_gap(request.dataset, last_finished, &shutdown).await {
                        self.monitors.get(request.dataset).force_pending.store(false, Ordering::Release);
                        break;
                    }

                    let report = Arc::new(
                        self.run_cycle(&self.tasks[index].spec, Trigger::Manual, &shutdown).await,
                    );
                    self.monitors
                        .get(request.dataset)
                        .force_pending
                        .store(false, Ordering::Release);
                    last_finished = Some((request.dataset, Instant::now()));
                    let outcome = report.outcome.clone();
                    let _ = request.reply.send(report);

                    if outcome == CycleOutcome::Cancelled {
                        break;
                    }
                    let now = Instant::now();
                    if matches!(outcome, CycleOutcome::Published { .. }) {
                        due[index] = now + self.tasks[index].schedule.next_delay(Utc::now());
                        triggers[index] = Trigger::Scheduled;
                    }
                    self.space_out(&mut due, index, now);
                    self.publish_next_due(&due);
                }
                _ = time::sleep_until(at) => {
                    let report = self.run_cycle(&self.tasks[next].spec, triggers[next], &shutdown).await;
                    if report.outcome == CycleOutcome::Cancelled {
                        break;
                    }
                    let now = Instant::now();
                    last_finished = Some((self.tasks[next].spec.dataset, now));
                    due[next] = now + self.tasks[next].schedule.next_delay(Utc::now());
                    triggers[next] = Trigger::Scheduled;
                    self.space_out(&mut due, next, now);
                    self.publish_next_due(&due);
                }
            }
        }

        for monitor in self.monitors.iter() {
            monitor.set_phase(Phase::Idle);
        }
        info!("Refresh scheduler stopped");
    }

    fn task_index(&self, dataset: DatasetId) -> Option<usize> {
        self.tasks.iter().position(|t| t.spec.dataset == dataset)
    }

    /// Keep every other dataset at least one gap behind the cycle that just ran.
    fn space_out(&self, due: &mut [Instant], ran: usize, now: Instant) {
        let earliest_allowed = now + self.settings.inter_cycle_gap;
        for (i, at) in due.iter_mut().enumerate() {
            if i != ran && *at < earliest_allowed {
                *at = earliest_allowed;
            }
        }
    }

    fn publish_next_due(&self, due: &[Instant]) {
        for (task, &at) in self.tasks.iter().zip(due) {
            self.monitors
                .get(task.spec.dataset)
                .next_due
                .send_replace(Some(wall_time(at)));
        }
    }

    /// Sit out the remainder of the inter-cycle gap before a manual cycle of
    /// `dataset`, when the last cycle belonged to another dataset.
    ///
    /// Returns `false` if shutdown interrupted the wait.
    async fn wait_for_gap(
        &self,
        dataset: DatasetId,
        last_finished: Option<(DatasetId, Instant)>,
        shutdown: &CancellationToken,
    ) -> bool {
        let Some((previous, finished)) = last_finished else {
            return true;
        };
        let ready_at = finished + self.settings.inter_cycle_gap;
        if previous == dataset || ready_at <= Instant::now() {
            return true;
        }

        let monitor = self.monitors.get(dataset);
        monitor.set_phase(Phase::Waiting {
            until: wall_time(ready_at),
        });
        debug!(
            dataset = %dataset,
            previous = %previous,
            wait = fmt_duration(ready_at.saturating_duration_since(Instant::now())),
            "Spacing manual refresh after previous cycle"
        );

        let waited = tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = time::sleep_until(ready_at) => true,
        };
        monitor.set_phase(Phase::Idle);
        waited
    }

    /// Backoff wait, then a deadline-bounded fetch; publishes or records the failure.
    #[tracing::instrument(skip_all, fields(dataset = %task.dataset, trigger = ?trigger))]
    async fn run_cycle(
        &self,
        task: &TaskSpec,
        trigger: Trigger,
        shutdown: &CancellationToken,
    ) -> CycleReport {
        let monitor = self.monitors.get(task.dataset);
        let started_at = Utc::now();
        let started = Instant::now();

        let outcome = 'cycle: {
            let delay = monitor.tracker.should_delay();
            if !delay.is_zero() {
                let until = TimeDelta::from_std(delay)
                    .ok()
                    .and_then(|delta| started_at.checked_add_signed(delta))
                    .unwrap_or(started_at);
                monitor.set_phase(Phase::Waiting { until });
                info!(
                    delay = fmt_duration(delay),
                    consecutive_failures = monitor.tracker.state().consecutive_failures,
                    "Backing off before refresh"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break 'cycle CycleOutcome::Cancelled,
                    _ = time::sleep(delay) => {}
                }
            }

            monitor.set_phase(Phase::Fetching { since: Utc::now() });
            debug!(sub_queries = task.sub_queries.len(), "Refresh cycle started");

            let deadline = self.settings.cycle_deadline;
            let result = tokio::select! {
                _ = shutdown.cancelled() => break 'cycle CycleOutcome::Cancelled,
                result = time::timeout(deadline, self.fetcher.fetch(task)) => {
                    result.unwrap_or(Err(FetchError::Timeout(deadline)))
                }
            };

            match result {
                Ok(payload) => {
                    let snapshot = self.store.publish(task.dataset, payload);
                    monitor.tracker.record_success();
                    CycleOutcome::Published {
                        published_at: snapshot.published_at.unwrap_or(started_at),
                    }
                }
                Err(error) => {
                    monitor.tracker.record_failure();
                    CycleOutcome::Failed(error)
                }
            }
        };

        monitor.set_phase(Phase::Idle);
        let report = CycleReport {
            dataset: task.dataset,
            trigger,
            started_at,
            duration: started.elapsed(),
            outcome,
        };

        match &report.outcome {
            CycleOutcome::Published { .. } => info!(
                duration = fmt_duration(report.duration),
                "Published fresh snapshot"
            ),
            CycleOutcome::Failed(error) => warn!(
                duration = fmt_duration(report.duration),
                error = %error,
                kind = error.kind(),
                consecutive_failures = monitor.tracker.state().consecutive_failures,
                "Refresh cycle failed, keeping current snapshot"
            ),
            CycleOutcome::Cancelled => info!("Refresh cycle cancelled"),
        }
        log_if_slow(started, SLOW_CYCLE_THRESHOLD, "refresh cycle");

        monitor.last_cycle.send_replace(Some(Arc::new(report.clone())));
        report
    }
}

fn earliest(due: &[Instant]) -> (usize, Instant) {
    due.iter()
        .copied()
        .enumerate()
        .min_by_key(|&(_, at)| at)
        .unwrap_or((0, Instant::now()))
}
