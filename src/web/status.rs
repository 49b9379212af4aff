//! Health and status handlers.

use axum::extract::State;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::trace;

use crate::data::DatasetId;
use crate::refresh::{CycleOutcome, CycleReport, FailureState, Origin, Phase, Trigger};
use crate::state::{AppState, ServiceStatus};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
    since_secs: u64,
}

/// Summary of a finished refresh cycle.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub trigger: Trigger,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&CycleReport> for CycleSummary {
    fn from(report: &CycleReport) -> Self {
        let (published_at, error_kind, error) = match &report.outcome {
            CycleOutcome::Published { published_at } => (Some(*published_at), None, None),
            CycleOutcome::Failed(e) => (None, Some(e.kind()), Some(e.to_string())),
            CycleOutcome::Cancelled => (None, None, None),
        };
        Self {
            trigger: report.trigger,
            status: report.outcome.as_str(),
            started_at: report.started_at,
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            published_at,
            error_kind,
            error,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStatus {
    dataset: DatasetId,
    origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    age_secs: Option<i64>,
    #[serde(flatten)]
    failures: FailureState,
    backoff_remaining_secs: u64,
    phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_cycle: Option<CycleSummary>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    services: BTreeMap<String, ServiceInfo>,
    datasets: Vec<DatasetStatus>,
}

/// Health check endpoint
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

fn dataset_status(state: &AppState, dataset: DatasetId) -> DatasetStatus {
    let snapshot = state.query.respond(dataset);
    let monitor = state.refresh.monitor(dataset);
    let now = Utc::now();

    DatasetStatus {
        dataset,
        origin: snapshot.origin,
        published_at: snapshot.published_at,
        age_secs: snapshot
            .published_at
            .map(|at| (now - at).num_seconds().max(0)),
        failures: monitor.tracker.state(),
        backoff_remaining_secs: monitor.tracker.should_delay().as_secs(),
        phase: monitor.phase(),
        next_due_at: monitor.next_due(),
        last_cycle: monitor.last_cycle().as_deref().map(CycleSummary::from),
    }
}

/// Service health plus per-dataset refresh state.
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();

    for (name, svc_status, since) in state.service_statuses.all() {
        services.insert(
            name.clone(),
            ServiceInfo {
                name,
                status: svc_status,
                since_secs: since.as_secs(),
            },
        );
    }

    let overall_status = if services
        .values()
        .any(|s| matches!(s.status, ServiceStatus::Error))
    {
        ServiceStatus::Error
    } else if services.is_empty() {
        ServiceStatus::Disabled
    } else if services
        .values()
        .any(|s| matches!(s.status, ServiceStatus::Starting))
    {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Active
    };

    Json(StatusResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        services,
        datasets: DatasetId::ALL
            .into_iter()
            .map(|dataset| dataset_status(&state, dataset))
            .collect(),
    })
}
