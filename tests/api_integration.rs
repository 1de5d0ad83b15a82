//! Integration tests for the HTTP API
//!
//! Tests API endpoints against a running engine

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tower::ServiceExt;

use proxlock::core::{create_router, Engine, LoggingAdapter, ManualClock, PresenceCore};

const DISCOVERY: &str =
    r#"{"event": "discovered", "id": "aa:bb", "level": -59.0, "at": "2023-11-14T22:13:21Z"}"#;
const PHONE: &str = r#"{"device": "aa:bb", "reference_at_one_meter": -59.0, "max_distance": 2.0}"#;

fn create_test_router() -> Router {
    let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let (engine, _task) = Engine::new(PresenceCore::default(), Arc::new(LoggingAdapter::new()), Arc::new(clock))
        .spawn();
    create_router(engine)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if body.is_some() {
        request = request.header("content-type", "application/json");
    }
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_router();
    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["links"], 0);
}

#[tokio::test]
async fn test_configure_link() {
    let app = create_test_router();
    let (status, json) = send(&app, "PUT", "/links/phone", Some(PHONE)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["link"], "phone");
    assert_eq!(json["state"], "UNLINKED");
    assert_eq!(json["reason"], "L001_DEVICE_NOT_VISIBLE");

    let (status, json) = send(&app, "GET", "/links", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_invalid_link_rejected() {
    let app = create_test_router();
    let body = r#"{"device": "aa:bb", "reference_at_one_meter": -59.0, "max_distance": 0.0}"#;
    let (status, json) = send(&app, "PUT", "/links/phone", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("max_distance"));
}

#[tokio::test]
async fn test_unbounded_idle_timeout_rejected() {
    let app = create_test_router();
    let body = r#"{"device": "aa:bb", "reference_at_one_meter": -59.0, "max_distance": 2.0,
                   "idle_timeout_secs": 10000000000000000}"#;
    let (status, json) = send(&app, "PUT", "/links/phone", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("idle_timeout_secs"));

    send(&app, "POST", "/radio/events", Some(DISCOVERY)).await;
    let (status, _) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/devices", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_link_not_found() {
    let app = create_test_router();

    let (status, _) = send(&app, "GET", "/links/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "POST", "/links/ghost/evaluate", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/links/ghost/history", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", "/links/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_radio_event_links_device() {
    let app = create_test_router();
    send(&app, "PUT", "/links/phone", Some(PHONE)).await;

    let (status, _) = send(&app, "POST", "/radio/events", Some(DISCOVERY)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, json) = send(&app, "GET", "/links/phone", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "LINKED");
    assert_eq!(json["samples"], 1);

    let (_, json) = send(&app, "GET", "/devices", None).await;
    assert_eq!(json[0]["id"], "aa:bb");

    let (status, json) = send(&app, "POST", "/links/phone/evaluate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "LINKED");
}

#[tokio::test]
async fn test_history_series() {
    let app = create_test_router();
    send(&app, "PUT", "/links/phone", Some(PHONE)).await;
    send(&app, "POST", "/radio/events", Some(DISCOVERY)).await;

    let (status, json) = send(&app, "GET", "/links/phone/history?series=distance&retention_secs=600", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["series"], "distance");
    let samples = json["samples"].as_array().unwrap();
    assert_eq!(samples.len(), 1);
    assert!((samples[0]["value"].as_f64().unwrap() - 1.0).abs() < 1e-9);

    let (_, json) = send(&app, "GET", "/links/phone/history?series=raw&max=0", None).await;
    assert_eq!(json["samples"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_malformed_radio_event_rejected() {
    let app = create_test_router();
    let (status, _) = send(&app, "POST", "/radio/events", Some(r#"{"event": "teleported"}"#)).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_delete_link() {
    let app = create_test_router();
    send(&app, "PUT", "/links/phone", Some(PHONE)).await;

    let (status, _) = send(&app, "DELETE", "/links/phone", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", "/links/phone", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
