//! Per-service model cache in front of a [`ModelStore`]

use crate::health::{components, HealthRegistry};
use crate::model::{AnomalyModel, IsolationForest};
use crate::error::EngineError;
use crate::observability::EngineMetrics;
use crate::store::ModelStore;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub cached_models: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
}

/// Lazily loads at most one model per service and keeps it until cleared
///
/// Readers clone the `Arc` out of the map, so scoring never holds a shard
/// lock.
pub struct ModelCache {
    store: Arc<dyn ModelStore>,
    models: DashMap<String, Arc<IsolationForest>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    metrics: EngineMetrics,
    health: Option<HealthRegistry>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self {
            store,
            models: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            metrics: EngineMetrics::new(),
            health: None,
        }
    }

    /// Report store failures and recoveries under the `model_store` component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    async fn store_failed(&self, service: &str, error: &EngineError) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(health) = &self.health {
            health
                .record_failure(components::MODEL_STORE, format!("{}: {}", service, error))
                .await;
        }
    }

    async fn store_succeeded(&self) {
        if let Some(health) = &self.health {
            health.record_success(components::MODEL_STORE).await;
        }
    }

    /// Model for `service`, loading it from the store on first use
    ///
    /// A missing model and a failed load both come back as `None`; failures
    /// are logged, reported to the health registry when one is attached and
    /// retried on the next call.
    pub async fn get(&self, service: &str) -> Option<Arc<IsolationForest>> {
        if let Some(model) = self.models.get(service) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(model.value()));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        match self.store.exists(service).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(service = %service, "No model stored for service");
                return None;
            }
            Err(e) => {
                error!(service = %service, error = %e, "Failed to check model store");
                self.store_failed(service, &e).await;
                return None;
            }
        }

        match self.store.load(service).await {
            Ok(model) => {
                self.loads.fetch_add(1, Ordering::Relaxed);
                self.store_succeeded().await;
                // a concurrent load may have won; keep whichever landed first
                let model = Arc::clone(
                    self.models
                        .entry(service.to_string())
                        .or_insert_with(|| Arc::new(model))
                        .value(),
                );
                self.metrics.set_cached_models(self.models.len() as i64);
                info!(
                    event = "model_loaded",
                    service = %service,
                    n_features = model.n_features(),
                    cached = self.models.len(),
                    "Loaded model into cache"
                );
                Some(model)
            }
            Err(e) => {
                error!(service = %service, error = %e, "Failed to load model");
                self.store_failed(service, &e).await;
                None
            }
        }
    }

    /// Drop every cached model; the next `get` reloads from the store
    pub fn clear(&self) -> usize {
        let evicted = self.models.len();
        self.models.clear();
        self.metrics.set_cached_models(0);
        info!(evicted, "Cleared model cache");
        evicted
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.models.contains_key(service)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_models: self.models.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Result;
    use crate::health::ComponentStatus;
    use crate::model::{train_isolation_forest, TrainingParams};
    use crate::models::{FeatureMatrix, MetricName, ModelMetadata};
    use async_trait::async_trait;
    use std::collections::HashMap;

    pub(crate) fn tiny_model() -> IsolationForest {
        let rows = (0..32)
            .map(|i| {
                let x = i as f64;
                vec![70.0 + x % 5.0, 60.0 + x % 3.0, 120.0 + x % 7.0, 1000.0 + x, 0.5]
            })
            .collect();
        let matrix = FeatureMatrix::new(MetricName::column_names(), rows).unwrap();
        let params = TrainingParams {
            n_estimators: 8,
            ..Default::default()
        };
        train_isolation_forest(&matrix, &params).unwrap()
    }

    /// In-memory store counting loads; `broken` services fail to load
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub models: HashMap<String, IsolationForest>,
        pub broken: Vec<String>,
        pub loads: AtomicU64,
    }

    #[async_trait]
    impl ModelStore for MemoryStore {
        async fn exists(&self, service: &str) -> Result<bool> {
            Ok(self.models.contains_key(service) || self.broken.iter().any(|b| b == service))
        }

        async fn load(&self, service: &str) -> Result<IsolationForest> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.broken.iter().any(|b| b == service) {
                return Err(EngineError::Store("corrupt model".to_string()));
            }
            self.models
                .get(service)
                .cloned()
                .ok_or_else(|| EngineError::ModelNotFound(service.to_string()))
        }

        async fn load_metadata(&self, _service: &str) -> Result<Option<ModelMetadata>> {
            Ok(None)
        }

        async fn save(&self, service: &str, model: &IsolationForest, _: &ModelMetadata) -> Result<String> {
            Ok(format!("memory://{}/{}", service, model.trees().len()))
        }
    }

    fn store_with(services: &[&str]) -> Arc<MemoryStore> {
        let model = tiny_model();
        Arc::new(MemoryStore {
            models: services
                .iter()
                .map(|s| (s.to_string(), model.clone()))
                .collect(),
            broken: vec!["broken".to_string()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_miss_then_hit_loads_once() {
        let store = store_with(&["api"]);
        let cache = ModelCache::new(store.clone());

        let first = cache.get("api").await.unwrap();
        let second = cache.get("api").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.cached_models, 1);
    }

    #[tokio::test]
    async fn test_missing_model_is_none_and_not_cached() {
        let cache = ModelCache::new(store_with(&["api"]));
        assert!(cache.get("ghost").await.is_none());
        assert!(!cache.contains("ghost"));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_load_failure_is_none() {
        let cache = ModelCache::new(store_with(&[]));
        assert!(cache.get("broken").await.is_none());
        assert_eq!(cache.stats().load_failures, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_degrades_model_store_until_next_load() {
        let health = HealthRegistry::with_scorer_components().await;
        let cache = ModelCache::new(store_with(&["api"])).with_health(health.clone());

        assert!(cache.get("broken").await.is_none());
        assert!(cache.get("broken").await.is_none());
        let report = health.health().await;
        let store = &report.components[components::MODEL_STORE];
        assert_eq!(store.status, ComponentStatus::Degraded);
        assert_eq!(store.consecutive_failures, 2);
        assert!(store.message.as_deref().unwrap().contains("broken"));

        cache.get("api").await.unwrap();
        assert_eq!(
            health.status(components::MODEL_STORE).await,
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_clear_forces_reload() {
        let store = store_with(&["api", "db"]);
        let cache = ModelCache::new(store.clone());
        cache.get("api").await.unwrap();
        cache.get("db").await.unwrap();
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        cache.get("api").await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_entry() {
        let cache = Arc::new(ModelCache::new(store_with(&["api"])));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get("api").await }));
        }
        let models: Vec<_> = futures_join(handles).await;
        assert!(models.iter().all(|m| m.is_some()));
        assert_eq!(cache.len(), 1);
    }

    async fn futures_join(
        handles: Vec<tokio::task::JoinHandle<Option<Arc<IsolationForest>>>>,
    ) -> Vec<Option<Arc<IsolationForest>>> {
        let mut out = Vec::new();
        for h in handles {
            out.push(h.await.unwrap());
        }
        out
    }
}
