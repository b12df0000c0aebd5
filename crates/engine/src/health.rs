//! Component health for the online scorer
//!
//! The subscriber reports sink outcomes here; the service turns the
//! aggregate into liveness and readiness probes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst, so the aggregate is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but batches still flow
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
    /// Failures reported since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            checked_at: Utc::now(),
            consecutive_failures,
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None, 0)
    }
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst component status; healthy when nothing is registered
    pub fn aggregate(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `GET /readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Names of the tracked scorer components
pub mod components {
    pub const SUBSCRIBER: &str = "subscriber";
    pub const MODEL_STORE: &str = "model_store";
    pub const WRITER: &str = "writer";
    pub const PUBLISHER: &str = "publisher";

    pub const ALL: [&str; 4] = [SUBSCRIBER, MODEL_STORE, WRITER, PUBLISHER];
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared, cloneable view of component health and readiness
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every scorer component registered as healthy
    pub async fn with_scorer_components() -> Self {
        let registry = Self::new();
        for name in components::ALL {
            registry.register(name).await;
        }
        registry
    }

    pub async fn register(&self, name: &str) {
        self.put(name, ComponentHealth::healthy()).await;
    }

    async fn put(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.put(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.mark(name, ComponentStatus::Degraded, message.into(), 0).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.mark(name, ComponentStatus::Unhealthy, message.into(), 0).await;
    }

    /// Set a failing status, carrying the streak forward plus `extra`, under one write guard
    async fn mark(&self, name: &str, status: ComponentStatus, message: String, extra: u32) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(name)
            .map_or(0, |h| h.consecutive_failures)
            + extra;
        state.components.insert(
            name.to_string(),
            ComponentHealth::new(status, Some(message), failures),
        );
    }

    /// Mark `name` degraded and bump its failure streak
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        self.mark(name, ComponentStatus::Degraded, message.into(), 1).await;
    }

    /// Reset `name` to healthy unless it already is
    pub async fn record_success(&self, name: &str) {
        let mut state = self.state.write().await;
        if state.components.get(name).map(|h| h.status) != Some(ComponentStatus::Healthy) {
            state
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn status(&self, name: &str) -> Option<ComponentStatus> {
        self.state.read().await.components.get(name).map(|h| h.status)
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse {
            status: HealthResponse::aggregate(&components),
            components,
        }
    }

    /// Ready once startup finished, until shutdown begins or a component fails hard
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.ready {
            Some("scorer is starting or draining".to_string())
        } else {
            state
                .components
                .iter()
                .find(|(_, h)| h.status == ComponentStatus::Unhealthy)
                .map(|(name, _)| format!("component {} is unhealthy", name))
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
