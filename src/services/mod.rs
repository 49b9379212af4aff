//! Long-running services and their lifecycle.

pub mod manager;
pub mod refresher;
pub mod signals;
pub mod web;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A long-running component driven by the [`manager::ServiceManager`].
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Runs until the work is done or `shutdown` is cancelled. Returning
    /// before shutdown is treated as an unexpected exit.
    async fn run(&mut self, shutdown: CancellationToken) -> anyhow::Result<()>;

    /// Cleanup after `run` has returned because of shutdown.
    async fn shutdown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// How a service's task ended.
#[derive(Debug)]
pub enum ServiceResult {
    /// `run` returned on its own, without a shutdown request.
    NormalCompletion,
    GracefulShutdown,
    Error(anyhow::Error),
}

/// Drive one service to completion, then run its shutdown hook if asked to stop.
pub(crate) async fn run_service(
    mut service: Box<dyn Service>,
    shutdown: CancellationToken,
) -> ServiceResult {
    let name = service.name();
    tracing::info!(service = name, "service started");

    let result = service.run(shutdown.clone()).await;

    if !shutdown.is_cancelled() {
        return match result {
            Ok(()) => {
                tracing::warn!(service = name, "service completed unexpectedly");
                ServiceResult::NormalCompletion
            }
            Err(e) => {
                tracing::error!(service = name, error = ?e, "service failed");
                ServiceResult::Error(e)
            }
        };
    }

    if let Err(e) = result {
        tracing::warn!(service = name, error = ?e, "service errored while stopping");
    }
    match service.shutdown().await {
        Ok(()) => {
            tracing::info!(service = name, "service shut down gracefully");
            ServiceResult::GracefulShutdown
        }
        Err(e) => {
            tracing::error!(service = name, error = ?e, "service shutdown failed");
            ServiceResult::Error(e)
        }
    }
}
