//! Manual force-refresh endpoint.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{debug, info};

use crate::data::DatasetId;
use crate::refresh::ForceRejected;
use crate::state::AppState;
use crate::utils::fmt_duration;
use crate::web::datasets::parse_dataset;
use crate::web::error::{ApiError, ApiErrorCode};
use crate::web::status::CycleSummary;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    dataset: DatasetId,
    /// `published`, `failed`, `cancelled`, or `pending` if the cycle outlived the wait.
    status: &'static str,
    consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cycle: Option<CycleSummary>,
}

impl From<ForceRejected> for ApiError {
    fn from(rejection: ForceRejected) -> Self {
        let message = rejection.to_string();
        match rejection {
            ForceRejected::BackingOff {
                consecutive_failures,
                retry_after,
            } => ApiError::new(ApiErrorCode::RateLimited, message)
                .with_detail("status", "backing_off")
                .with_detail("consecutiveFailures", consecutive_failures)
                .with_detail("retryAfterSecs", retry_after.as_secs())
                .with_retry_after(retry_after),
            ForceRejected::AlreadyQueued => ApiError::conflict(message),
            ForceRejected::Unavailable => ApiError::unavailable(message),
        }
    }
}

/// `POST /api/datasets/{dataset}/refresh`
///
/// Queues a cycle and waits up to `force_wait_timeout` for its outcome. The
/// cycle keeps running if the wait gives up first.
pub(super) async fn force_refresh(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> Result<Response, ApiError> {
    let dataset = parse_dataset(&dataset)?;
    let ticket = state.refresh.force(dataset)?;

    let waited = tokio::time::timeout(state.force_wait_timeout, ticket.wait()).await;
    let consecutive_failures = state.refresh.failure_state(dataset).consecutive_failures;

    let response = match waited {
        Ok(Some(report)) => {
            info!(dataset = %dataset, outcome = report.outcome.as_str(), "Manual refresh finished");
            RefreshResponse {
                dataset,
                status: report.outcome.as_str(),
                consecutive_failures,
                cycle: Some(CycleSummary::from(report.as_ref())),
            }
        }
        Ok(None) => {
            return Err(ApiError::unavailable(
                "the refresh scheduler stopped before running the request",
            ));
        }
        Err(_) => {
            debug!(
                dataset = %dataset,
                waited = fmt_duration(state.force_wait_timeout),
                "Manual refresh still running"
            );
            RefreshResponse {
                dataset,
                status: "pending",
                consecutive_failures,
                cycle: None,
            }
        }
    };

    Ok(Json(response).into_response())
}
