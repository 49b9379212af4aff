use crate::services::{Service, ServiceResult, run_service};
use crate::utils::fmt_duration;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the registered services, spawns them, and stops them together.
pub struct ServiceManager {
    registered: Vec<(String, Box<dyn Service>)>,
    running: JoinSet<(String, ServiceResult)>,
    shutdown: CancellationToken,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            registered: Vec::new(),
            running: JoinSet::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        debug!(service = name, "registered service");
        self.registered.push((name.to_owned(), service));
    }

    pub fn has_services(&self) -> bool {
        !self.registered.is_empty() || !self.running.is_empty()
    }

    /// Spawn every registered service on its own task.
    pub fn spawn_all(&mut self) {
        for (name, service) in self.registered.drain(..) {
            let shutdown = self.shutdown.child_token();
            self.running
                .spawn(async move { (name, run_service(service, shutdown).await) });
        }
        info!(count = self.running.len(), "spawned services");
    }

    /// Resolves when the first service exits, or `None` if none are running.
    pub async fn wait_for_exit(&mut self) -> Option<(String, ServiceResult)> {
        match self.running.join_next().await? {
            Ok(exited) => Some(exited),
            Err(e) => Some((
                "unknown".to_owned(),
                ServiceResult::Error(anyhow::anyhow!("service task panicked: {e}")),
            )),
        }
    }

    /// Signal every service to stop and wait up to `timeout` for them.
    ///
    /// Returns the elapsed time on success, or the number of services that
    /// were still running (and have been aborted) on timeout.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<Duration, usize> {
        let start = Instant::now();
        self.shutdown.cancel();

        let drain = async {
            while let Some(joined) = self.running.join_next().await {
                match joined {
                    Ok((name, ServiceResult::Error(e))) => {
                        warn!(service = %name, error = ?e, "service stopped with error");
                    }
                    Ok((name, _)) => debug!(service = %name, "service stopped"),
                    Err(e) => warn!(error = ?e, "service task failed to join"),
                }
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                let elapsed = start.elapsed();
                info!(duration = fmt_duration(elapsed), "all services stopped");
                Ok(elapsed)
            }
            Err(_) => {
                let pending = self.running.len();
                self.running.abort_all();
                Err(pending)
            }
        }
    }
}
