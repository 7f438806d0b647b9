// HTTP surface tests over a mock-provider engine

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use foreman_api::{app, AppState};
use foreman_core::ForemanConfig;
use foreman_engine::testing::{engine_with_providers, MockProvider};
use foreman_engine::Engine;

async fn test_app() -> (Router, Engine) {
    let provider = Arc::new(MockProvider::new("p1"));
    let engine = engine_with_providers(vec![provider], ForemanConfig::default()).await;
    let router = app(AppState {
        engine: engine.clone(),
    });
    (router, engine)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn create_body() -> Value {
    json!({
        "name": "fix-login",
        "kind": "standard",
        "task": "fix the login bug",
        "tags": ["bug"]
    })
}

#[tokio::test]
async fn test_create_and_get_workflow() {
    let (router, _engine) = test_app().await;

    let (status, body) = send(&router, "POST", "/v1/workflows", Some(create_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["state"], "created");
    assert_eq!(body["kind"], "standard");
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(&router, "GET", &format!("/v1/workflows/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "fix-login");
    assert_eq!(body["base_branch"], "main");
}

#[tokio::test]
async fn test_create_rejects_empty_name() {
    let (router, _engine) = test_app().await;
    let (status, _) = send(
        &router,
        "POST",
        "/v1/workflows",
        Some(json!({"name": "", "kind": "standard", "task": "t"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_workflow_is_404() {
    let (router, _engine) = test_app().await;
    let (status, _) = send(&router, "GET", "/v1/workflows/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, "GET", "/v1/workflows/nope/events", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_twice_conflicts() {
    let (router, _engine) = test_app().await;
    let (_, body) = send(&router, "POST", "/v1/workflows", Some(create_body())).await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, _) = send(&router, "POST", &format!("/v1/workflows/{}/start", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&router, "POST", &format!("/v1/workflows/{}/start", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_created_workflow_conflicts() {
    let (router, _engine) = test_app().await;
    let (_, body) = send(&router, "POST", "/v1/workflows", Some(create_body())).await;
    let id = body["id"].as_str().unwrap().to_string();

    // created workflows are not cancellable by the transition table
    let (status, _) = send(
        &router,
        "POST",
        &format!("/v1/workflows/{}/cancel", id),
        Some(json!({"reason": "nevermind"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_events_endpoint_returns_history() {
    let (router, _engine) = test_app().await;
    let (_, body) = send(&router, "POST", "/v1/workflows", Some(create_body())).await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(&router, "GET", &format!("/v1/workflows/{}/events", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_type"], "workflow_created");
    let first_seq = events[0]["seq"].as_i64().unwrap();

    let (_, body) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/events?since_seq={}", id, first_seq),
        None,
    )
    .await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_list_workflows_with_filters() {
    let (router, _engine) = test_app().await;
    send(&router, "POST", "/v1/workflows", Some(create_body())).await;
    send(
        &router,
        "POST",
        "/v1/workflows",
        Some(json!({"name": "other", "kind": "tdd", "task": "t"})),
    )
    .await;

    let (status, body) = send(&router, "GET", "/v1/workflows?kind=tdd", None).await;
    assert_eq!(status, StatusCode::OK);
    let workflows = body.as_array().unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0]["name"], "other");

    let (_, body) = send(&router, "GET", "/v1/workflows?tag=bug", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health_reports_components() {
    let (router, _engine) = test_app().await;
    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["components"]["state"], "healthy");
    assert_eq!(body["components"]["registry"], "healthy");
    // no journal attached in tests: events sink degraded but not fatal
    assert_eq!(body["components"]["events"], "degraded");
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_metrics_snapshot() {
    let (router, _engine) = test_app().await;
    send(&router, "POST", "/v1/workflows", Some(create_body())).await;

    let (status, body) = send(&router, "GET", "/v1/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let by_state = body["workflows_by_state"].as_array().unwrap();
    assert!(!by_state.is_empty());
    assert_eq!(body["active_workflows"], 0);
}
