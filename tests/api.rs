//! HTTP surface, driven in-process through the router.

mod helpers;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use helpers::{ScriptedSource, leaderboard_task, rows, test_config};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use trendboard::data::DatasetId;
use trendboard::refresh::RefreshSystem;
use trendboard::state::{AppState, ServiceStatusRegistry};
use trendboard::web::datasets::{ORIGIN_HEADER, PUBLISHED_AT_HEADER};
use trendboard::web::routes::create_router;

fn router(system: &RefreshSystem, force_wait_timeout: Duration) -> Router {
    create_router(AppState::new(
        system.query.clone(),
        system.handle.clone(),
        ServiceStatusRegistry::new(),
        force_wait_timeout,
    ))
}

async fn send(app: &Router, method: Method, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn idle_system() -> RefreshSystem {
    let mut config = test_config();
    config.refresh.refresh_on_startup = false;
    RefreshSystem::with_tasks(
        &config,
        ScriptedSource::empty(),
        vec![leaderboard_task(&["a", "b"])],
    )
}

#[tokio::test]
async fn dataset_endpoint_serves_fallback_with_headers() {
    let system = idle_system();
    let app = router(&system, Duration::from_secs(5));

    let response = send(&app, Method::GET, "/api/datasets/leaderboard").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[ORIGIN_HEADER], "fallback");
    assert!(response.headers().get(PUBLISHED_AT_HEADER).is_none());
    assert!(response.headers().contains_key(header::CACHE_CONTROL));
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items[0]["label"], "Belgium");
    assert_eq!(items[0]["value"], 200);
}

#[tokio::test]
async fn root_serves_the_leaderboard() {
    let system = idle_system();
    let app = router(&system, Duration::from_secs(5));

    let root = json_body(send(&app, Method::GET, "/").await).await;
    let leaderboard = json_body(send(&app, Method::GET, "/api/datasets/leaderboard").await).await;
    assert_eq!(root, leaderboard);
}

#[tokio::test]
async fn timeseries_fallback_has_dates_and_series() {
    let system = idle_system();
    let app = router(&system, Duration::from_secs(5));

    let body = json_body(send(&app, Method::GET, "/api/datasets/timeseries").await).await;
    assert!(!body["dates"].as_array().unwrap().is_empty());
    assert!(!body["series"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_dataset_is_not_found() {
    let system = idle_system();
    let app = router(&system, Duration::from_secs(5));

    let response = send(&app, Method::GET, "/api/datasets/countries").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");

    let response = send(&app, Method::POST, "/api/datasets/countries/refresh").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, Method::GET, "/api/nothing-here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_status() {
    let system = idle_system();
    let app = router(&system, Duration::from_secs(5));

    let response = send(&app, Method::GET, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");

    let body = json_body(send(&app, Method::GET, "/api/status").await).await;
    let datasets = body["datasets"].as_array().unwrap();
    assert_eq!(datasets.len(), DatasetId::ALL.len());
    assert_eq!(datasets[0]["dataset"], "leaderboard");
    assert_eq!(datasets[0]["origin"], "fallback");
    assert_eq!(datasets[0]["consecutiveFailures"], 0);
    assert_eq!(datasets[0]["phase"]["state"], "idle");
}

#[tokio::test(start_paused = true)]
async fn refresh_while_backing_off_is_rate_limited() {
    let system = idle_system();
    let tracker = &system.handle.monitor(DatasetId::Leaderboard).tracker;
    for _ in 0..3 {
        tracker.record_failure();
    }
    let app = router(&system, Duration::from_secs(5));

    let response = send(&app, Method::POST, "/api/datasets/leaderboard/refresh").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);

    let body = json_body(response).await;
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["status"], "backing_off");
    assert_eq!(body["consecutiveFailures"], 3);
}

#[tokio::test]
async fn refresh_without_scheduler_is_unavailable() {
    let RefreshSystem {
        scheduler,
        handle,
        query,
        store: _,
    } = idle_system();
    drop(scheduler);
    let app = create_router(AppState::new(
        query,
        handle,
        ServiceStatusRegistry::new(),
        Duration::from_secs(5),
    ));

    let response = send(&app, Method::POST, "/api/datasets/leaderboard/refresh").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], "unavailable");
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_publishes_fresh_snapshot() {
    let mut config = test_config();
    config.refresh.refresh_on_startup = false;
    let source = ScriptedSource::new([rows(&[("France", 70)]), rows(&[("France", 5)])]);
    let system =
        RefreshSystem::with_tasks(&config, source.clone(), vec![leaderboard_task(&["a", "b"])]);
    let app = router(&system, config.refresh.force_wait_timeout);
    let shutdown = CancellationToken::new();
    let scheduler = tokio::spawn(system.scheduler.run(shutdown.clone()));

    let response = send(&app, Method::POST, "/api/datasets/leaderboard/refresh").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "published");
    assert_eq!(body["consecutiveFailures"], 0);
    assert_eq!(body["cycle"]["trigger"], "manual");

    let response = send(&app, Method::GET, "/api/datasets/leaderboard").await;
    assert_eq!(response.headers()[ORIGIN_HEADER], "fresh");
    assert!(response.headers().contains_key(PUBLISHED_AT_HEADER));
    let body = json_body(response).await;
    assert_eq!(body["items"][0]["label"], "France");
    assert_eq!(body["items"][0]["value"], 75);
    assert_eq!(source.call_count(), 2);

    shutdown.cancel();
    scheduler.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_refresh_answers_pending_then_conflict() {
    let system = idle_system();
    // Held but never run, so queued requests never complete.
    let _scheduler = &system.scheduler;
    let app = router(&system, Duration::from_secs(2));

    let response = send(&app, Method::POST, "/api/datasets/leaderboard/refresh").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "pending");
    assert!(body.get("cycle").is_none());

    let response = send(&app, Method::POST, "/api/datasets/leaderboard/refresh").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"], "conflict");
}
