use crate::services::ServiceResult;
use crate::services::manager::ServiceManager;
use crate::utils::fmt_duration;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

/// Wait for Ctrl+C, SIGTERM, or a service exiting on its own, then stop every
/// service within `shutdown_timeout`.
pub async fn handle_shutdown_signals(
    mut service_manager: ServiceManager,
    shutdown_timeout: Duration,
) -> ExitCode {
    let mut exit_code = tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = ?e, "failed to listen for Ctrl+C");
            }
            info!("received Ctrl+C, shutting down");
            ExitCode::SUCCESS
        }
        _ = terminate() => {
            info!("received SIGTERM, shutting down");
            ExitCode::SUCCESS
        }
        exited = service_manager.wait_for_exit() => match exited {
            Some((name, ServiceResult::Error(e))) => {
                error!(service = %name, error = ?e, "service failed, shutting down");
                ExitCode::FAILURE
            }
            Some((name, _)) => {
                warn!(service = %name, "service exited unexpectedly, shutting down");
                ExitCode::FAILURE
            }
            None => {
                warn!("no services running");
                ExitCode::FAILURE
            }
        },
    };

    info!(
        timeout = fmt_duration(shutdown_timeout),
        "stopping services"
    );
    match service_manager.shutdown(shutdown_timeout).await {
        Ok(elapsed) => {
            info!(duration = fmt_duration(elapsed), "graceful shutdown complete");
        }
        Err(pending) => {
            warn!(
                pending_services = pending,
                "shutdown timed out, aborted remaining services"
            );
            exit_code = ExitCode::FAILURE;
        }
    }

    exit_code
}
