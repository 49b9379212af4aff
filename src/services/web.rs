use crate::services::Service;
use crate::state::{AppState, ServiceStatus};
use crate::web::create_router;
use anyhow::Context;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const NAME: &str = "web";

/// Serves the HTTP API with graceful shutdown.
pub struct WebService {
    port: u16,
    app_state: AppState,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState) -> Self {
        Self { port, app_state }
    }
}

#[async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let statuses = self.app_state.service_statuses.clone();
        statuses.set(NAME, ServiceStatus::Starting);

        let app = create_router(self.app_state.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                statuses.set(NAME, ServiceStatus::Error);
                return Err(e).with_context(|| format!("Failed to bind web server to {addr}"));
            }
        };

        info!(
            address = %addr,
            link = format!("http://localhost:{}", self.port),
            "web server listening"
        );
        statuses.set(NAME, ServiceStatus::Active);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if served.is_err() {
            statuses.set(NAME, ServiceStatus::Error);
        }
        served.context("Web server failed")
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.app_state
            .service_statuses
            .set(NAME, ServiceStatus::Disabled);
        Ok(())
    }
}
