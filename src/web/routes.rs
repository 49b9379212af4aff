//! Web API router construction and shared response utilities.

use axum::{
    Router,
    http::{HeaderValue, Method},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::state::AppState;
use crate::web::error::ApiError;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::{datasets, refresh, status};

/// Cache-Control presets for public endpoints.
pub mod cache {
    /// Published snapshots change at most a few times a day.
    pub const SNAPSHOT: &str = "public, max-age=60, stale-while-revalidate=300";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static(header),
    );
    response
}

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/status", get(status::status))
        .route("/datasets/{dataset}", get(datasets::get_dataset))
        .route("/datasets/{dataset}/refresh", post(refresh::force_refresh))
        .fallback(api_not_found)
        .with_state(app_state.clone());

    let router = Router::new()
        .route("/", get(datasets::root))
        .route("/health", get(status::health))
        .nest("/api", api_router)
        .with_state(app_state);

    router.layer((
        // Outermost: per-request ID span + severity-proportional response logging.
        RequestIdLayer,
        // Dashboards poll from arbitrary origins.
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
        CompressionLayer::new()
            .zstd(true)
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
        TimeoutLayer::new(Duration::from_secs(60)),
    ))
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("no such endpoint")
}
