//! Filesystem model store
//!
//! Layout per service:
//!
//! ```text
//! <base>/<service>/model.json      serialized forest
//! <base>/<service>/metadata.json   ModelMetadata
//! <base>/<service>/model.sha256    hex SHA-256 of model.json
//! <base>/<service>/version.txt     training timestamp tag
//! ```

use super::{validate_service_name, ModelStore};
use crate::error::{EngineError, Result};
use crate::model::IsolationForest;
use crate::models::ModelMetadata;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const MODEL_FILE: &str = "model.json";
const METADATA_FILE: &str = "metadata.json";
const CHECKSUM_FILE: &str = "model.sha256";
const VERSION_FILE: &str = "version.txt";

/// Compute SHA256 checksum of data
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Model store on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalModelStore {
    base: PathBuf,
}

impl LocalModelStore {
    /// Create the store, creating `base` if needed
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        std::fs::create_dir_all(&base).map_err(|e| {
            EngineError::Store(format!("failed to create model directory {}: {}", base.display(), e))
        })?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn service_dir(&self, service: &str) -> Result<PathBuf> {
        validate_service_name(service)?;
        Ok(self.base.join(service))
    }

    /// Services that have a stored model, sorted
    pub async fn list_services(&self) -> Result<Vec<String>> {
        let mut services = Vec::new();
        let mut entries = fs::read_dir(&self.base).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().join(MODEL_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    services.push(name.to_string());
                }
            }
        }
        services.sort();
        Ok(services)
    }

    /// Version tag of the stored model
    pub async fn version(&self, service: &str) -> Result<Option<String>> {
        let path = self.service_dir(service)?.join(VERSION_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path).await?.trim().to_string()))
    }

    /// Write to a temp file, then rename over the final path
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data).await.map_err(|e| {
            EngineError::Store(format!("failed to write {}: {}", temp_path.display(), e))
        })?;
        fs::rename(&temp_path, path).await.map_err(|e| {
            EngineError::Store(format!(
                "failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

#[async_trait]
impl ModelStore for LocalModelStore {
    async fn exists(&self, service: &str) -> Result<bool> {
        Ok(self.service_dir(service)?.join(MODEL_FILE).is_file())
    }

    async fn load(&self, service: &str) -> Result<IsolationForest> {
        let dir = self.service_dir(service)?;
        let model_path = dir.join(MODEL_FILE);
        if !model_path.is_file() {
            return Err(EngineError::ModelNotFound(service.to_string()));
        }

        let bytes = fs::read(&model_path).await?;
        let checksum_path = dir.join(CHECKSUM_FILE);
        if checksum_path.is_file() {
            let expected = fs::read_to_string(&checksum_path).await?;
            let computed = compute_checksum(&bytes);
            if expected.trim() != computed {
                return Err(EngineError::Store(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    service,
                    expected.trim(),
                    computed
                )));
            }
            debug!(service = %service, checksum = %computed, "Model checksum validated");
        }

        let model: IsolationForest = serde_json::from_slice(&bytes)?;
        model
            .validate()
            .map_err(|e| EngineError::Store(format!("rejected model for {}: {}", service, e)))?;
        info!(
            service = %service,
            path = %model_path.display(),
            trees = model.trees().len(),
            "Loaded model"
        );
        Ok(model)
    }

    async fn load_metadata(&self, service: &str) -> Result<Option<ModelMetadata>> {
        let path = self.service_dir(service)?.join(METADATA_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(
        &self,
        service: &str,
        model: &IsolationForest,
        metadata: &ModelMetadata,
    ) -> Result<String> {
        let dir = self.service_dir(service)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            EngineError::Store(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let model_bytes = serde_json::to_vec(model)?;
        let checksum = compute_checksum(&model_bytes);
        let version = metadata.trained_at.format("%Y%m%dT%H%M%SZ").to_string();

        // checksum before model so a crash never leaves a new model with an old checksum
        Self::write_atomic(&dir.join(CHECKSUM_FILE), checksum.as_bytes()).await?;
        Self::write_atomic(&dir.join(MODEL_FILE), &model_bytes).await?;
        Self::write_atomic(&dir.join(METADATA_FILE), &serde_json::to_vec_pretty(metadata)?).await?;
        Self::write_atomic(&dir.join(VERSION_FILE), version.as_bytes()).await?;

        let location = dir.join(MODEL_FILE).display().to_string();
        info!(
            service = %service,
            location = %location,
            version = %version,
            size = model_bytes.len(),
            checksum = %checksum,
            "Saved model"
        );
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{model_metadata, train_isolation_forest, AnomalyModel, TrainingParams};
    use crate::models::{FeatureMatrix, MetricName};
    use tempfile::TempDir;

    fn trained() -> (IsolationForest, ModelMetadata, FeatureMatrix) {
        let rows = (0..64)
            .map(|i| {
                let x = i as f64;
                vec![70.0 + x % 7.0, 60.0 + x % 5.0, 120.0 + x % 11.0, 1000.0 + x, 0.5]
            })
            .collect();
        let matrix = FeatureMatrix::new(MetricName::column_names(), rows).unwrap();
        let params = TrainingParams {
            n_estimators: 10,
            ..Default::default()
        };
        let model = train_isolation_forest(&matrix, &params).unwrap();
        let metadata = model_metadata(&model, &matrix).unwrap();
        (model, metadata, matrix)
    }

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum(b"hello world");
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalModelStore::new(temp_dir.path()).unwrap();
        let (model, metadata, matrix) = trained();

        assert!(!store.exists("api").await.unwrap());
        let location = store.save("api", &model, &metadata).await.unwrap();
        assert!(location.ends_with("model.json"));
        assert!(store.exists("api").await.unwrap());

        let loaded = store.load("api").await.unwrap();
        assert_eq!(
            loaded.decision_function(&matrix).unwrap(),
            model.decision_function(&matrix).unwrap()
        );
        assert_eq!(store.load_metadata("api").await.unwrap(), Some(metadata));
        assert!(store.version("api").await.unwrap().is_some());
        assert_eq!(store.list_services().await.unwrap(), vec!["api".to_string()]);
        assert!(!temp_dir.path().join("api").join("model.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_model() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalModelStore::new(temp_dir.path()).unwrap();
        let err = store.load("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::ModelNotFound(_)));
        assert_eq!(store.load_metadata("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tampered_model_fails_checksum() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalModelStore::new(temp_dir.path()).unwrap();
        let (model, metadata, _) = trained();
        store.save("api", &model, &metadata).await.unwrap();

        let path = temp_dir.path().join("api").join("model.json");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(b' ');
        std::fs::write(&path, bytes).unwrap();

        let err = store.load("api").await.unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn test_structurally_broken_model_rejected_without_checksum() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalModelStore::new(temp_dir.path()).unwrap();
        let (model, metadata, _) = trained();
        store.save("api", &model, &metadata).await.unwrap();

        let dir = temp_dir.path().join("api");
        let mut json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("model.json")).unwrap()).unwrap();
        json["trees"][0]["nodes"] = serde_json::json!([
            {"kind": "split", "feature": 9, "threshold": 0.0, "left": 1, "right": 2},
            {"kind": "leaf", "size": 1},
            {"kind": "leaf", "size": 1}
        ]);
        std::fs::write(dir.join("model.json"), serde_json::to_vec(&json).unwrap()).unwrap();
        std::fs::remove_file(dir.join("model.sha256")).unwrap();

        let err = store.load("api").await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        assert!(err.to_string().contains("rejected model for api"));
    }

    #[tokio::test]
    async fn test_unsafe_service_name_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalModelStore::new(temp_dir.path()).unwrap();
        assert!(store.exists("../outside").await.is_err());
    }
}
