//! Integration tests for the scorer API endpoints

use anomaly_engine::{
    cache::ModelCache,
    health::{components, HealthRegistry},
    model::{train_service, TrainingInput, TrainingOptions, TrainingParams},
    observability::StructuredLogger,
    scoring::Scorer,
    sink::{JsonlFileWriter, LogPublisher},
    store::LocalModelStore,
    subscriber::{BatchSubscriber, LoopStats, PushSource, SubscriberLoop},
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::Engine;
use online_scorer::api::{create_router, AppState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    shutdown: broadcast::Sender<()>,
    loop_handle: JoinHandle<LoopStats>,
    _dir: TempDir,
}

async fn setup_test_app() -> TestApp {
    setup_with_writer_path(None).await
}

/// App with a trained `frontend-api` model and a running subscriber loop
///
/// Every reading is flagged anomalous so pushes exercise the writer.
async fn setup_with_writer_path(writer_path: Option<&Path>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalModelStore::new(dir.path().join("models")).unwrap());
    let options = TrainingOptions {
        params: TrainingParams {
            n_estimators: 16,
            ..Default::default()
        },
        ..Default::default()
    };
    train_service(
        &*store,
        "frontend-api",
        TrainingInput::Synthetic { days: 1, seed: 42 },
        &options,
    )
    .await
    .unwrap();

    let writer_path = writer_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.path().join("out").join("anomalies.jsonl"));
    let writer = Arc::new(JsonlFileWriter::new(&writer_path).unwrap());

    let health_registry = HealthRegistry::with_scorer_components().await;
    let subscriber = Arc::new(BatchSubscriber::new(
        Arc::new(ModelCache::new(store).with_health(health_registry.clone())),
        Scorer::new(1.0),
        writer,
        Arc::new(LogPublisher),
        health_registry.clone(),
        StructuredLogger::new("test-node"),
    ));

    let (source, push) = PushSource::new(8);
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let subscriber_loop = SubscriberLoop::new(Arc::clone(&subscriber), 2);
    let loop_handle = tokio::spawn(async move { subscriber_loop.run(source, shutdown_rx).await });

    let state = Arc::new(AppState::new(
        health_registry,
        subscriber,
        push,
        Duration::from_secs(5),
    ));
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        shutdown,
        loop_handle,
        _dir: dir,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn push_envelope(batch: &serde_json::Value) -> String {
    let data = base64::engine::general_purpose::STANDARD.encode(batch.to_string());
    serde_json::json!({
        "message": {"data": data, "messageId": "1"},
        "subscription": "projects/test/subscriptions/metric-batches"
    })
    .to_string()
}

fn batch(service: &str) -> serde_json::Value {
    serde_json::json!({
        "service_name": service,
        "metrics": [
            {"timestamp": "2024-01-01T00:00:00Z", "metric_name": "cpu_usage", "value": 98.0},
            {"timestamp": "2024-01-01T00:00:00Z", "metric_name": "error_rate", "value": 12.0}
        ]
    })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let response = app.router.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["writer"].is_object());
    assert!(health["components"]["publisher"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_degraded(components::PUBLISHER, "webhook timeout")
        .await;

    let response = app.router.oneshot(get("/healthz")).await.unwrap();

    // Degraded still returns 200 (operational)
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_unhealthy(components::MODEL_STORE, "model directory unreadable")
        .await;

    let response = app.router.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_follows_initialization() {
    let app = setup_test_app().await;

    let response = app.router.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);

    app.state.health_registry.set_ready(true).await;
    let response = app.router.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_push_anomalies_are_written_and_acked() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(post("/push", push_envelope(&batch("frontend-api"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.router.oneshot(get("/admin/cache")).await.unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["cached_models"], 1);
    assert_eq!(stats["loads"], 1);
}

#[tokio::test]
async fn test_push_for_unknown_service_is_acked() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(post("/push", push_envelope(&batch("checkout"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_corrupt_model_is_acked_and_reported_on_healthz() {
    let app = setup_test_app().await;
    let model_path = app._dir.path().join("models").join("frontend-api").join("model.json");
    let mut bytes = std::fs::read(&model_path).unwrap();
    bytes.push(b' ');
    std::fs::write(&model_path, bytes).unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post("/push", push_envelope(&batch("frontend-api"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.router.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["model_store"]["status"], "degraded");
    assert_eq!(health["components"]["model_store"]["consecutive_failures"], 1);
}

#[tokio::test]
async fn test_undecodable_envelope_is_acked() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(post("/push", r#"{"message": {"data": "%%%"}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_write_failure_returns_503() {
    // A directory cannot be appended to, so every write fails
    let blocker = tempfile::tempdir().unwrap();
    let app = setup_with_writer_path(Some(blocker.path())).await;

    let response = app
        .router
        .oneshot(post("/push", push_envelope(&batch("frontend-api"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        app.state.health_registry.health().await.components[components::WRITER].status,
        anomaly_engine::ComponentStatus::Degraded
    );
}

#[tokio::test]
async fn test_push_after_loop_stopped_returns_503() {
    let app = setup_test_app().await;
    app.shutdown.send(()).unwrap();
    app.loop_handle.await.unwrap();

    let response = app
        .router
        .oneshot(post("/push", push_envelope(&batch("frontend-api"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_admin_reload_clears_cache() {
    let app = setup_test_app().await;
    app.router
        .clone()
        .oneshot(post("/push", push_envelope(&batch("frontend-api"))))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post("/admin/reload", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reloaded = body_json(response).await;
    assert_eq!(reloaded["status"], "reloaded");
    assert_eq!(reloaded["evicted"], 1);

    assert!(app.state.subscriber.cache().is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app().await;
    app.router
        .clone()
        .oneshot(post("/push", push_envelope(&batch("frontend-api"))))
        .await
        .unwrap();

    let response = app.router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("anomaly_engine_batches_received_total"));
    assert!(metrics_text.contains("anomaly_engine_batch_latency_seconds_bucket"));
    assert!(metrics_text.contains("anomaly_engine_anomalies_detected_total"));
}
