//! Integration tests for the API server.

use std::sync::Arc;
use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{ConsumerConfig, CorrelationId};
use saga_store::InMemorySagaStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    setup_with_state().0
}

fn setup_with_state() -> (
    axum::Router,
    Arc<api::routes::sagas::AppState<InMemorySagaStore>>,
) {
    let state =
        api::create_default_state(InMemorySagaStore::new(), "memory", ConsumerConfig::default())
            .unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn send(
    app: &axum::Router,
    request: Request<Body>,
) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn post_event(event_type: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/events/{event_type}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: impl AsRef<str>) -> Request<Body> {
    Request::builder()
        .uri(uri.as_ref())
        .body(Body::empty())
        .unwrap()
}

fn start_test(id: CorrelationId) -> Request<Body> {
    post_event(
        "StartTest",
        serde_json::json!({ "correlation_id": id, "test_key": "Unique" }),
    )
}

fn update_test(id: CorrelationId) -> Request<Body> {
    post_event(
        "UpdateTest",
        serde_json::json!({ "test_id": id, "test_key": "Unique" }),
    )
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["machine"], "TestStateMachine");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_machine_probe() {
    let app = setup();

    let (status, json) = send(&app, get("/machine")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "TestStateMachine");
    let states: Vec<&str> = json["children"]
        .as_array()
        .unwrap()
        .iter()
        .map(|state| state["name"].as_str().unwrap())
        .collect();
    assert_eq!(states, vec!["Initial", "Active", "Done", "Final"]);
}

#[tokio::test]
async fn test_start_creates_saga() {
    let app = setup();
    let id = CorrelationId::new();

    let (status, json) = send(&app, start_test(id)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["outcome"], "created");
    assert_eq!(json["state"], "Active");
    assert_eq!(json["correlation_id"], id.to_string());

    let (status, saga) = send(&app, get(format!("/sagas/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saga["current_state"], "Active");
    assert_eq!(saga["key"], "Unique");
    assert_eq!(saga["version"], 1);
}

#[tokio::test]
async fn test_update_finalizes_and_removes_saga() {
    let (app, state) = setup_with_state();
    let id = CorrelationId::new();
    send(&app, start_test(id)).await;

    let (status, json) = send(&app, update_test(id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "finalized");

    let (status, _) = send(&app, get(format!("/sagas/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, published) = send(&app, get("/published?message_type=TestUpdated")).await;
    assert_eq!(status, StatusCode::OK);
    let published = published.as_array().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["payload"]["test_key"], "Unique");
    assert_eq!(state.publisher.count().await, 2);
}

#[tokio::test]
async fn test_update_unknown_saga_is_not_found() {
    let app = setup();

    let (status, json) = send(&app, update_test(CorrelationId::new())).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_repeated_start_conflicts() {
    let app = setup();
    let id = CorrelationId::new();
    send(&app, start_test(id)).await;

    let (status, json) = send(&app, start_test(id)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("StartTest"));
}

#[tokio::test]
async fn test_bad_requests() {
    let app = setup();

    let (status, _) = send(&app, post_event("Explode", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        post_event("UpdateTest", serde_json::json!({ "test_key": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/sagas/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_published_lists_all_messages() {
    let app = setup();
    send(&app, start_test(CorrelationId::new())).await;
    send(&app, start_test(CorrelationId::new())).await;

    let (status, json) = send(&app, get("/published")).await;

    assert_eq!(status, StatusCode::OK);
    let messages = json.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m["message_type"] == "TestStarted"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    send(&app, start_test(CorrelationId::new())).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("saga_events_consumed_total"));
}
