use crate::refresh::RefreshScheduler;
use crate::services::Service;
use crate::state::{ServiceStatus, ServiceStatusRegistry};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub const NAME: &str = "refresher";

/// Runs the refresh scheduler loop.
pub struct RefreshService {
    scheduler: Option<RefreshScheduler>,
    statuses: ServiceStatusRegistry,
}

impl RefreshService {
    pub fn new(scheduler: RefreshScheduler, statuses: ServiceStatusRegistry) -> Self {
        Self {
            scheduler: Some(scheduler),
            statuses,
        }
    }
}

#[async_trait]
impl Service for RefreshService {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let Some(scheduler) = self.scheduler.take() else {
            self.statuses.set(NAME, ServiceStatus::Error);
            anyhow::bail!("refresh scheduler can only run once");
        };

        self.statuses.set(NAME, ServiceStatus::Active);
        scheduler.run(shutdown).await;
        Ok(())
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.statuses.set(NAME, ServiceStatus::Disabled);
        Ok(())
    }
}
