use crate::cli::ServiceName;
use crate::config::Config;
use crate::refresh::{RefreshScheduler, RefreshSystem};
use crate::services::manager::ServiceManager;
use crate::services::refresher::RefreshService;
use crate::services::web::WebService;
use crate::state::{AppState, ServiceStatusRegistry};
use crate::trends::TrendsClient;
use crate::utils::fmt_duration;
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
    scheduler: Option<RefreshScheduler>,
    service_manager: ServiceManager,
}

impl App {
    /// Wire the upstream client, the refresh subsystem, and shared state.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let client = TrendsClient::new(&config.trends).context("Failed to create Trends client")?;

        let RefreshSystem {
            scheduler,
            handle,
            query,
            store: _,
        } = RefreshSystem::new(&config, Arc::new(client));

        let app_state = AppState::new(
            query,
            handle,
            ServiceStatusRegistry::new(),
            config.refresh.force_wait_timeout,
        );

        info!(
            keywords = ?config.trends.keywords,
            countries = config.trends.countries.len(),
            timeframe = config.trends.timeframe,
            pacing = format!(
                "{}..{}",
                fmt_duration(config.refresh.pacing_min),
                fmt_duration(config.refresh.pacing_max)
            ),
            abort_threshold = config.refresh.abort_threshold,
            "refresh configured"
        );

        Ok(App {
            config,
            app_state,
            scheduler: Some(scheduler),
            service_manager: ServiceManager::new(),
        })
    }

    /// Setup and register services based on enabled service list
    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        if services.contains(&ServiceName::Web) {
            let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
            self.service_manager
                .register_service(ServiceName::Web.as_str(), web_service);
        }

        // An unclaimed scheduler is dropped here, closing the force channel.
        let scheduler = self.scheduler.take();
        if services.contains(&ServiceName::Refresher)
            && let Some(scheduler) = scheduler
        {
            let refresh_service = Box::new(RefreshService::new(
                scheduler,
                self.app_state.service_statuses.clone(),
            ));
            self.service_manager
                .register_service(ServiceName::Refresher.as_str(), refresh_service);
        }

        if !self.service_manager.has_services() {
            error!("No services enabled. Cannot start application.");
            return Err(anyhow::anyhow!("No services enabled"));
        }

        Ok(())
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        use crate::services::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DatasetId;
    use crate::refresh::ForceRejected;

    #[tokio::test]
    async fn web_only_refuses_manual_refresh() {
        let mut app = App::new(Config::default()).unwrap();
        app.setup_services(&[ServiceName::Web]).unwrap();

        for _ in 0..2 {
            assert_eq!(
                app.app_state.refresh.force(DatasetId::Leaderboard).unwrap_err(),
                ForceRejected::Unavailable
            );
        }
    }

    #[tokio::test]
    async fn refresher_keeps_force_channel_open() {
        let mut app = App::new(Config::default()).unwrap();
        app.setup_services(&[ServiceName::Web, ServiceName::Refresher])
            .unwrap();

        let ticket = app.app_state.refresh.force(DatasetId::Timeseries).unwrap();
        assert_eq!(ticket.dataset, DatasetId::Timeseries);
    }
}
