//! JSON API tests driven through the router without binding a socket.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use listing_vcs::server::router;
use listing_vcs::VersionManager;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    router(Arc::new(VersionManager::in_memory()))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn test_save_and_read_back() {
    let app = app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/listings/P-100/versions",
        Some(json!({"payload": {"title": "A", "price": 10}, "summary": "import", "author": "ana"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["outcome"], "created");
    assert_eq!(body["version"]["version_id"], "1.0.0");
    assert_eq!(body["version"]["author"], "ana");

    let (status, body) = send(
        &app,
        Method::POST,
        "/listings/P-100/versions",
        Some(json!({"payload": {"title": "A", "price": 10}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "unchanged");

    let (status, body) = send(&app, Method::GET, "/listings/P-100/branches/main/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"], json!({"title": "A", "price": 10}));

    let (status, body) = send(
        &app,
        Method::GET,
        "/listings/P-100/branches/main/versions/1.0.0",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["change_summary"], "import");
}

#[tokio::test]
async fn test_missing_resources_are_404() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/listings/none/branches/main/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        Method::GET,
        "/listings/none/branches/main/versions/1.0.0",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        "/listings/none/rollback",
        Some(json!({"target_version": "1.0.0"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_version_string_is_400() {
    let app = app();
    send(
        &app,
        Method::POST,
        "/listings/L1/versions",
        Some(json!({"payload": {"title": "A"}})),
    )
    .await;

    let (status, _) = send(&app, Method::GET, "/listings/L1/compare?a=1.0.0&b=banana", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_compare_and_timeline() {
    let app = app();
    for payload in [
        json!({"title": "A", "price": 10}),
        json!({"title": "B", "price": 10}),
        json!({"title": "B", "price": 11}),
    ] {
        let (status, _) = send(
            &app,
            Method::POST,
            "/listings/P-100/versions",
            Some(json!({"payload": payload})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, Method::GET, "/listings/P-100/compare?a=1.0.0&b=2.0.1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed_fields"], 2);
    assert_eq!(body["change_severity"], "major");

    let (status, body) = send(&app, Method::GET, "/listings/P-100/timeline?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_versions"], 2);
    assert_eq!(body["current_version"], "2.0.1");

    let (status, body) = send(&app, Method::GET, "/listings/P-100/export", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_versions"], 3);
    assert!(body["versions"][0].get("payload").is_none());
}

#[tokio::test]
async fn test_branch_merge_rollback_flow() {
    let app = app();
    send(
        &app,
        Method::POST,
        "/listings/L1/versions",
        Some(json!({"payload": {"title": "A", "price": 10}})),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/listings/L1/branches",
        Some(json!({"name": "promo", "author": "growth"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["branch"], "promo");
    assert_eq!(body["version_id"], "1.0.0");

    let (status, _) = send(
        &app,
        Method::POST,
        "/listings/L1/branches",
        Some(json!({"name": "promo"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(
        &app,
        Method::POST,
        "/listings/L1/versions",
        Some(json!({"payload": {"title": "A", "price": 7}, "branch": "promo"})),
    )
    .await;

    let (status, body) = send(&app, Method::GET, "/listings/L1/compare-branches?a=main&b=promo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed_fields"], 1);

    let (status, body) = send(
        &app,
        Method::POST,
        "/listings/L1/merge",
        Some(json!({"source_branch": "promo"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"]["version_id"], "1.1.0");
    assert_eq!(body["version"]["change_type"], "minor");

    let (status, body) = send(
        &app,
        Method::POST,
        "/listings/L1/rollback",
        Some(json!({"target_version": "1.0.0", "author": "ops"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"]["change_type"], "rollback");
    assert_eq!(body["version"]["payload"]["price"], 10);

    let (status, body) = send(&app, Method::GET, "/listings/L1/branches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["main", "promo"]));
}

#[tokio::test]
async fn test_auto_version_endpoint() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/listings/L1/auto-version",
        Some(json!({"payload": {"title": "Ceramic Mug", "description": "Holds coffee", "price": 10}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["outcome"], "created");

    let (status, body) = send(
        &app,
        Method::POST,
        "/listings/L1/auto-version",
        Some(json!({
            "payload": {"title": "Ceramic Mug", "description": "Holds coffee", "price": 11},
            "threshold": 0.9
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "below_threshold");
    assert_eq!(body["threshold"], 0.9);
}
