//! Background refresh of the published datasets.
//!
//! The scheduler is the only caller of the upstream. Request handlers read
//! snapshots through [`QueryService`] and request manual refreshes through
//! [`RefreshHandle`]; neither ever waits on an upstream call to serve a read.

pub mod backoff;
pub mod fetcher;
pub mod handle;
pub mod query;
pub mod scheduler;
pub mod store;

pub use backoff::{BackoffPolicy, FailureState, FailureTracker};
pub use fetcher::{FetchError, Fetcher, PacingConfig, SubQueryOutcome, TaskSpec};
pub use handle::{ForceRejected, ForceTicket, RefreshHandle};
pub use query::QueryService;
pub use scheduler::{
    CycleOutcome, CycleReport, Phase, RefreshScheduler, Schedule, ScheduledTask,
    SchedulerSettings, TaskMonitor, TaskMonitors, Trigger,
};
pub use store::{Origin, Snapshot, SnapshotStore};

use crate::config::Config;
use crate::data::DatasetId;
use crate::trends::TrendsSource;
use crate::trends::aggregate::Aggregation;
use crate::trends::plan;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cycle definition and schedule of every dataset, in [`DatasetId::ALL`] order.
pub fn scheduled_tasks(config: &Config) -> Vec<ScheduledTask> {
    DatasetId::ALL
        .into_iter()
        .map(|dataset| {
            let schedule = match dataset {
                DatasetId::Leaderboard => &config.refresh.leaderboard,
                DatasetId::Timeseries => &config.refresh.timeseries,
            };
            ScheduledTask {
                spec: TaskSpec {
                    dataset,
                    sub_queries: plan::sub_queries(dataset, &config.trends),
                    aggregation: Aggregation::for_dataset(dataset, config.trends.top_n),
                },
                schedule: Schedule::from_config(schedule),
            }
        })
        .collect()
}

/// The wired refresh subsystem. The scheduler is consumed by whoever runs it;
/// the other parts are cheap to clone into request state.
pub struct RefreshSystem {
    pub scheduler: RefreshScheduler,
    pub handle: RefreshHandle,
    pub query: QueryService,
    pub store: Arc<SnapshotStore>,
}

impl RefreshSystem {
    pub fn new(config: &Config, source: Arc<dyn TrendsSource>) -> Self {
        Self::with_tasks(config, source, scheduled_tasks(config))
    }

    pub fn with_tasks(
        config: &Config,
        source: Arc<dyn TrendsSource>,
        tasks: Vec<ScheduledTask>,
    ) -> Self {
        let refresh = &config.refresh;
        let store = Arc::new(SnapshotStore::new());
        let monitors = Arc::new(TaskMonitors::new(BackoffPolicy::from_config(refresh)));
        let (force_tx, force_rx) = mpsc::channel(DatasetId::ALL.len());

        let scheduler = RefreshScheduler::new(
            Fetcher::new(source, PacingConfig::from_config(refresh)),
            store.clone(),
            monitors.clone(),
            tasks,
            SchedulerSettings {
                cycle_deadline: refresh.cycle_deadline,
                inter_cycle_gap: refresh.inter_cycle_gap,
                refresh_on_startup: refresh.refresh_on_startup,
            },
            force_rx,
        );

        Self {
            scheduler,
            handle: RefreshHandle::new(force_tx, monitors, refresh.force_reject_threshold),
            query: QueryService::new(store.clone()),
            store,
        }
    }
}
