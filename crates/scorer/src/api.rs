//! HTTP API: push delivery, health checks, Prometheus metrics and admin routes

use anomaly_engine::{
    health::HealthRegistry,
    observability::EngineMetrics,
    subscriber::{decode_push_envelope, BatchSubscriber, Disposition, PushHandle},
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// State shared by every route
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub subscriber: Arc<BatchSubscriber>,
    pub push: PushHandle,
    pub delivery_timeout: Duration,
    metrics: EngineMetrics,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        subscriber: Arc<BatchSubscriber>,
        push: PushHandle,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            health_registry,
            subscriber,
            push,
            delivery_timeout,
            metrics: EngineMetrics::new(),
        }
    }
}

fn probe_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness: 503 only once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    (probe_status(health.status.is_operational()), Json(health))
}

/// Readiness: false outside the serving window and when a component is unhealthy
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    (probe_status(readiness.ready), Json(readiness))
}

/// Prometheus text exposition of the global registry
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Push delivery endpoint
///
/// 204 tells the broker the message is settled, 503 asks for redelivery.
/// An envelope that cannot be decoded will never succeed and is acked.
async fn push(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    let payload = match decode_push_envelope(&body) {
        Ok(payload) => payload,
        Err(e) => {
            state.metrics.inc_malformed_messages();
            warn!(error = %e, "Dropping undecodable push envelope");
            return StatusCode::NO_CONTENT;
        }
    };

    let message_id = payload.message_id.unwrap_or_default();
    let delivery = state.push.deliver(payload.data);
    match tokio::time::timeout(state.delivery_timeout, delivery).await {
        Ok(Ok(Disposition::Ack)) => StatusCode::NO_CONTENT,
        Ok(Ok(Disposition::Nack)) => StatusCode::SERVICE_UNAVAILABLE,
        Ok(Err(e)) => {
            warn!(message_id = %message_id, error = %e, "Push delivery rejected");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(_) => {
            warn!(message_id = %message_id, "Push delivery timed out");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Drop every cached model so the next batch loads fresh ones
async fn reload(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let evicted = state.subscriber.reload_models();
    info!(evicted, "Model cache reloaded via admin endpoint");
    Json(serde_json::json!({ "status": "reloaded", "evicted": evicted }))
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.subscriber.cache().stats())
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/push", post(push))
        .route("/admin/reload", post(reload))
        .route("/admin/cache", get(cache_stats))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
///
/// Requests already in flight, including push deliveries waiting on the
/// subscriber loop, are allowed to finish.
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
