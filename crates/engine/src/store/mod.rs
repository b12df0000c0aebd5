//! Persistent storage of trained per-service models

mod local;

pub use local::LocalModelStore;

use crate::error::{EngineError, Result};
use crate::model::IsolationForest;
use crate::models::ModelMetadata;
use async_trait::async_trait;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Storage contract for trained models, keyed by service name
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn exists(&self, service: &str) -> Result<bool>;

    /// Fails with [`EngineError::ModelNotFound`] when nothing is stored
    async fn load(&self, service: &str) -> Result<IsolationForest>;

    async fn load_metadata(&self, service: &str) -> Result<Option<ModelMetadata>>;

    /// Persist a model and its metadata, returning where it was written
    async fn save(
        &self,
        service: &str,
        model: &IsolationForest,
        metadata: &ModelMetadata,
    ) -> Result<String>;
}

/// Storage backend selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Local,
}

impl FromStr for StoreBackend {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(StoreBackend::Local),
            other => Err(EngineError::Configuration(format!(
                "unsupported model store backend: {}. Supported: local",
                other
            ))),
        }
    }
}

/// Open the configured store rooted at `base`
pub fn open_store(backend: StoreBackend, base: &Path) -> Result<Arc<dyn ModelStore>> {
    match backend {
        StoreBackend::Local => Ok(Arc::new(LocalModelStore::new(base)?)),
    }
}

/// Reject service names that could escape the store directory
pub(crate) fn validate_service_name(service: &str) -> Result<()> {
    let safe = !service.is_empty()
        && service != "."
        && service != ".."
        && service
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if safe {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "invalid service name for model store: {:?}",
            service
        )))
    }
}
