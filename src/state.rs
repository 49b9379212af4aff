//! Application state shared across components (web, refresher).

use crate::refresh::{QueryService, RefreshHandle};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Health status of a service.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Active,
    Disabled,
    Error,
}

/// A timestamped status entry for a service.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the status for a named service.
    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| entry.status.clone())
    }

    /// Returns a snapshot of all service statuses with how long each has held.
    pub fn all(&self) -> Vec<(String, ServiceStatus, Duration)> {
        self.inner
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().status.clone(),
                    entry.value().updated_at.elapsed(),
                )
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub refresh: RefreshHandle,
    pub service_statuses: ServiceStatusRegistry,
    /// How long a force-refresh request waits for its cycle before answering.
    pub force_wait_timeout: Duration,
}

impl AppState {
    pub fn new(
        query: QueryService,
        refresh: RefreshHandle,
        service_statuses: ServiceStatusRegistry,
        force_wait_timeout: Duration,
    ) -> Self {
        Self {
            query,
            refresh,
            service_statuses,
            force_wait_timeout,
        }
    }
}
