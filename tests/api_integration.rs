//! Integration tests for the Plume data service and HTTP API.
//!
//! A local axum app stands in for the remote data service, and snapshots are
//! written to temporary files, so every request crosses a real socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{Json, Router, body::Body, http::Request, http::StatusCode, routing::get};
use axum_test::TestServer;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

use plume::api::{AppState, router};
use plume::model::{CacheStatus, DataSource};
use plume::sources::rest::{GROUP_TABLE, POLLUTANT_TABLE, TIMESERIES_TABLE};
use plume::sources::{RestGateway, SnapshotClient};
use plume::{DataService, HydrationError};

/// Nothing listens here, so connections are refused straight away.
const UNREACHABLE: &str = "http://127.0.0.1:1";

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Serve fixed tables, counting series requests.
async fn data_service(
    pollutants: Value,
    groups: Value,
    rows: Value,
    series_calls: Arc<AtomicUsize>,
) -> String {
    let app = Router::new()
        .route(
            &format!("/{}", POLLUTANT_TABLE),
            get(move || async move { Json(pollutants) }),
        )
        .route(
            &format!("/{}", GROUP_TABLE),
            get(move || async move { Json(groups) }),
        )
        .route(
            &format!("/{}", TIMESERIES_TABLE),
            get(move || async move {
                series_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Json(rows)
            }),
        );
    serve(app).await
}

async fn minimal_data_service(series_calls: Arc<AtomicUsize>) -> String {
    data_service(
        json!([{"id": 1, "name": "PM2.5"}]),
        json!([{"id": 9, "title": "All"}]),
        json!([{"pollutant_id": 1, "group_id": 9, "f2023": 42}]),
        series_calls,
    )
    .await
}

fn write_snapshot(name: &str, document: &Value) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "plume-{}-{}-{}.json",
        name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::write(&path, document.to_string()).unwrap();
    path
}

fn default_view_snapshot() -> Value {
    json!({
        "generatedAt": "2025-01-15T10:30:00Z",
        "defaults": {"pollutantId": 1, "groupIds": [9, 10]},
        "data": {
            "pollutants": [
                {"id": 1, "pollutant": "PM2.5", "emission_unit": "kt"},
                {"id": 2, "pollutant": "Activity Data"}
            ],
            "groups": [
                {"id": 9, "group_title": "All", "has_activity_data": true},
                {"id": 10, "group_title": "Road Transport", "has_activity_data": true},
                {"id": 11, "group_title": "Shipping", "has_activity_data": "false"}
            ],
            "timeseries": [
                {"pollutant_id": 1, "group_id": 9, "f2022": 40, "f2023": 42},
                {"pollutant_id": 1, "group_id": 10, "f2022": 12.5, "f2023": null}
            ],
            "yearKeys": ["f2022", "f2023"]
        }
    })
}

fn test_server(service: DataService) -> TestServer {
    TestServer::new(router(AppState { service })).unwrap()
}

#[tokio::test]
async fn test_unreachable_gateway_served_from_snapshot() {
    let path = write_snapshot("offline", &default_view_snapshot());
    let service = DataService::builder()
        .gateway(Arc::new(RestGateway::new(UNREACHABLE, None)))
        .snapshot(SnapshotClient::from_file(&path))
        .build();

    let data = assert_ok!(service.load_data().await);

    assert_eq!(data.pollutants.len(), 2);
    assert_eq!(data.rows.len(), 2);
    assert_eq!(data.years, vec![2022, 2023]);
    assert!(service.is_loaded());
    assert!(!service.is_full());
    assert_eq!(service.state().source, Some(DataSource::Snapshot));

    let report = assert_ok!(service.active_groups());
    let titles: Vec<&str> = report.active.iter().map(|g| g.title.as_str()).collect();
    assert_eq!(titles, vec!["Road Transport"]);
    assert!(!report.fallback);

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn test_minimal_dataset_hydrates_full_and_notifies_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let url = minimal_data_service(calls.clone()).await;
    let service = DataService::builder()
        .gateway(Arc::new(RestGateway::new(&url, Some("anon".into()))))
        .build();

    let hydrated = Arc::new(AtomicUsize::new(0));
    let counter = hydrated.clone();
    let _subscription = service.on_hydrated(move |event| {
        assert_eq!(event.row_count, 1);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let data = assert_ok!(service.load_data().await);
    assert_eq!(data.rows[0].value(2023), Some(42.0));
    assert!(service.is_full());

    // Served from cache, no second notification
    assert_ok!(service.load_data().await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(hydrated.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nothing_reachable_fails() {
    let service = DataService::builder()
        .gateway(Arc::new(RestGateway::new(UNREACHABLE, None)))
        .snapshot(SnapshotClient::from_file("/nonexistent/plume-snapshot.json"))
        .build();

    let err = assert_err!(service.load_data().await);

    assert_eq!(err, HydrationError::FetchFailed("all data sources failed".into()));
    assert_eq!(service.state().status, CacheStatus::Empty);
}

#[tokio::test]
async fn test_get_data_endpoint() {
    let calls = Arc::new(AtomicUsize::new(0));
    let url = minimal_data_service(calls).await;
    let service = DataService::builder()
        .gateway(Arc::new(RestGateway::new(&url, None)))
        .build();
    let server = test_server(service);

    let response = server.get("/data").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["full"], true);
    assert_eq!(body["status"], "full");
    assert_eq!(body["data"]["pollutants"][0]["name"], "PM2.5");
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let url = minimal_data_service(calls.clone()).await;
    let service = DataService::builder()
        .gateway(Arc::new(RestGateway::new(&url, None)))
        .build();

    let (a, b, c) = tokio::join!(service.load_data(), service.load_data(), service.load_data());

    assert_ok!(a);
    assert_ok!(b);
    assert_ok!(c);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cached_endpoint_before_and_after_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let url = minimal_data_service(calls).await;
    let service = DataService::builder()
        .gateway(Arc::new(RestGateway::new(&url, None)))
        .build();
    let server = test_server(service);

    let response = server.get("/data/cached").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"], "not_loaded");

    server.get("/data").await.assert_status_ok();

    let response = server.get("/data/cached").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["source"], "bootstrap");
}

#[tokio::test]
async fn test_status_and_invalidate() {
    let calls = Arc::new(AtomicUsize::new(0));
    let url = minimal_data_service(calls.clone()).await;
    let service = DataService::builder()
        .gateway(Arc::new(RestGateway::new(&url, None)))
        .build();
    let server = test_server(service);

    let body: Value = server.get("/data/status").await.json();
    assert_eq!(body["loaded"], false);
    assert_eq!(body["status"], "empty");

    server.get("/data").await.assert_status_ok();
    let body: Value = server.get("/data/status").await.json();
    assert_eq!(body["loaded"], true);
    assert_eq!(body["full"], true);

    server
        .post("/data/invalidate")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    let body: Value = server.get("/data/status").await.json();
    assert_eq!(body["loaded"], false);

    server.get("/data").await.assert_status_ok();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_data_endpoint_without_sources_is_unavailable() {
    let server = test_server(DataService::builder().build());

    let response = server.get("/data").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"], "source_unavailable");
}

#[tokio::test]
async fn test_data_endpoint_with_unreachable_gateway_is_bad_gateway() {
    let service = DataService::builder()
        .gateway(Arc::new(RestGateway::new(UNREACHABLE, None)))
        .build();
    let server = test_server(service);

    server.get("/data").await.assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_active_groups_endpoint_from_snapshot() {
    let path = write_snapshot("groups", &default_view_snapshot());
    let service = DataService::builder()
        .snapshot(SnapshotClient::from_file(&path))
        .build();
    let server = test_server(service);

    server
        .get("/groups/active")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server.get("/data").await.assert_status_ok();

    let response = server.get("/groups/active").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["mode"], "provisional");
    assert_eq!(body["active"][0]["title"], "Road Transport");
    assert_eq!(body["inactive_count"], 1);

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = router(AppState {
        service: DataService::builder().build(),
    });

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
