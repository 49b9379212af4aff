//! Manual refresh requests from outside the scheduler loop.

use crate::data::DatasetId;
use crate::refresh::backoff::FailureState;
use crate::refresh::scheduler::{CycleReport, ForceRequest, TaskMonitor, TaskMonitors};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForceRejected {
    #[error("backing off after {consecutive_failures} consecutive failed refreshes")]
    BackingOff {
        consecutive_failures: u32,
        /// Until the next scheduled attempt, at least one second.
        retry_after: Duration,
    },
    #[error("a refresh of this dataset is already queued")]
    AlreadyQueued,
    #[error("the refresh scheduler is not running")]
    Unavailable,
}

/// A queued manual refresh. Await [`ForceTicket::wait`] for the cycle report.
#[derive(Debug)]
pub struct ForceTicket {
    pub dataset: DatasetId,
    reply: oneshot::Receiver<Arc<CycleReport>>,
}

impl ForceTicket {
    /// The finished cycle, or `None` if the scheduler stopped before running it.
    pub async fn wait(self) -> Option<Arc<CycleReport>> {
        self.reply.await.ok()
    }
}

/// Cloneable entry point for force refreshes and task introspection.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    force_tx: mpsc::Sender<ForceRequest>,
    monitors: Arc<TaskMonitors>,
    force_reject_threshold: u32,
}

impl RefreshHandle {
    pub(crate) fn new(
        force_tx: mpsc::Sender<ForceRequest>,
        monitors: Arc<TaskMonitors>,
        force_reject_threshold: u32,
    ) -> Self {
        Self {
            force_tx,
            monitors,
            force_reject_threshold,
        }
    }

    pub fn monitor(&self, dataset: DatasetId) -> &TaskMonitor {
        self.monitors.get(dataset)
    }

    pub fn monitors(&self) -> &TaskMonitors {
        &self.monitors
    }

    pub fn failure_state(&self, dataset: DatasetId) -> FailureState {
        self.monitors.get(dataset).tracker.state()
    }

    /// Queue a manual refresh of `dataset`.
    ///
    /// Refused without contacting the scheduler once the dataset has failed
    /// `force_reject_threshold` cycles in a row, so a throttled upstream is
    /// not hammered by impatient callers.
    pub fn force(&self, dataset: DatasetId) -> Result<ForceTicket, ForceRejected> {
        let monitor = self.monitors.get(dataset);
        let state = monitor.tracker.state();

        if state.consecutive_failures >= self.force_reject_threshold {
            let until_next = monitor
                .next_due()
                .and_then(|at| (at - Utc::now()).to_std().ok())
                .unwrap_or_default();
            let retry_after = monitor
                .tracker
                .should_delay()
                .max(until_next)
                .max(Duration::from_secs(1));
            info!(
                dataset = %dataset,
                consecutive_failures = state.consecutive_failures,
                retry_after_secs = retry_after.as_secs(),
                "Rejected manual refresh while backing off"
            );
            return Err(ForceRejected::BackingOff {
                consecutive_failures: state.consecutive_failures,
                retry_after,
            });
        }

        if monitor.force_pending.swap(true, Ordering::AcqRel) {
            return Err(ForceRejected::AlreadyQueued);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ForceRequest {
            dataset,
            reply: reply_tx,
        };
        if let Err(e) = self.force_tx.try_send(request) {
            monitor.force_pending.store(false, Ordering::Release);
            debug!(dataset = %dataset, error = %e, "Could not queue manual refresh");
            return Err(ForceRejected::Unavailable);
        }

        info!(dataset = %dataset, "Queued manual refresh");
        Ok(ForceTicket {
            dataset,
            reply: reply_rx,
        })
    }
}
