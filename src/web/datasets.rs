//! Snapshot read endpoints.

use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::response::Response;
use tracing::trace;

use crate::data::DatasetId;
use crate::refresh::Snapshot;
use crate::state::AppState;
use crate::web::error::ApiError;
use crate::web::routes::{cache, with_cache_control};

pub const ORIGIN_HEADER: &str = "x-snapshot-origin";
pub const PUBLISHED_AT_HEADER: &str = "x-snapshot-published-at";

/// Resolve a path segment to a dataset, or 404.
pub(super) fn parse_dataset(raw: &str) -> Result<DatasetId, ApiError> {
    raw.parse::<DatasetId>()
        .map_err(|e| ApiError::not_found(e.to_string()))
}

fn snapshot_response(snapshot: &Snapshot) -> Response {
    let mut response = with_cache_control(&snapshot.payload, cache::SNAPSHOT);
    let headers = response.headers_mut();
    headers.insert(
        ORIGIN_HEADER,
        HeaderValue::from_static(snapshot.origin.as_str()),
    );
    if let Some(published_at) = snapshot.published_at
        && let Ok(value) = HeaderValue::from_str(&published_at.to_rfc3339())
    {
        headers.insert(PUBLISHED_AT_HEADER, value);
    }
    response
}

/// `GET /` -- the leaderboard, where existing dashboard widgets poll it.
pub(super) async fn root(State(state): State<AppState>) -> Response {
    snapshot_response(&state.query.respond(DatasetId::Leaderboard))
}

/// `GET /api/datasets/{dataset}`
pub(super) async fn get_dataset(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> Result<Response, ApiError> {
    let dataset = parse_dataset(&dataset)?;
    let snapshot = state.query.respond(dataset);
    trace!(dataset = %dataset, origin = snapshot.origin.as_str(), "serving snapshot");
    Ok(snapshot_response(&snapshot))
}
