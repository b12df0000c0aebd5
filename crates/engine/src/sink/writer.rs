use super::{http_client, parse_endpoint, AnomalyWriter};
use crate::error::{EngineError, Result};
use crate::models::AnomalyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Writer that only logs, for local runs without persistence
#[derive(Debug, Default, Clone)]
pub struct LogWriter;

#[async_trait]
impl AnomalyWriter for LogWriter {
    async fn write(&self, anomalies: &[AnomalyResult]) -> Result<()> {
        info!(count = anomalies.len(), "Anomalies accepted by log writer");
        for anomaly in anomalies {
            debug!(
                service = %anomaly.service_name,
                metric = %anomaly.metric_name,
                value = anomaly.value,
                score = anomaly.anomaly_score,
                severity = %anomaly.severity,
                "Anomaly"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Appends one JSON object per anomaly to a local file
#[derive(Debug)]
pub struct JsonlFileWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFileWriter {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AnomalyWriter for JsonlFileWriter {
    async fn write(&self, anomalies: &[AnomalyResult]) -> Result<()> {
        if anomalies.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for anomaly in anomalies {
            serde_json::to_writer(&mut buf, anomaly)?;
            buf.push(b'\n');
        }

        // concurrent batches must not interleave lines
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| EngineError::Write(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(&buf)
            .await
            .map_err(|e| EngineError::Write(format!("append {}: {}", self.path.display(), e)))?;
        file.flush().await?;

        info!(count = anomalies.len(), path = %self.path.display(), "Wrote anomalies to file");
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Row shape of the anomalies table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseRow {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub metric_name: String,
    pub anomaly_score: f64,
    pub expected_value: f64,
    pub actual_value: f64,
    pub severity: String,
    pub description: String,
}

impl From<&AnomalyResult> for WarehouseRow {
    fn from(anomaly: &AnomalyResult) -> Self {
        Self {
            timestamp: anomaly.timestamp,
            service_name: anomaly.service_name.clone(),
            metric_name: anomaly.metric_name.clone(),
            anomaly_score: anomaly.anomaly_score,
            // no forecast is available online
            expected_value: 0.0,
            actual_value: anomaly.value,
            severity: anomaly.severity.to_string(),
            description: format!(
                "Anomaly detected: {} = {:.2} (score: {:.4})",
                anomaly.metric_name, anomaly.value, anomaly.anomaly_score
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// Streams rows into an analytics warehouse over HTTP
///
/// The endpoint receives `{"rows": [...]}` and may answer with
/// `{"errors": [...]}`; any reported row error fails the whole write.
#[derive(Debug, Clone)]
pub struct WarehouseWriter {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl WarehouseWriter {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: parse_endpoint(endpoint)?,
        })
    }
}

#[async_trait]
impl AnomalyWriter for WarehouseWriter {
    async fn write(&self, anomalies: &[AnomalyResult]) -> Result<()> {
        if anomalies.is_empty() {
            return Ok(());
        }

        let rows: Vec<WarehouseRow> = anomalies.iter().map(WarehouseRow::from).collect();
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&serde_json::json!({ "rows": rows }))
            .send()
            .await
            .map_err(|e| EngineError::Write(format!("warehouse request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = %status, body = %body, "Warehouse insert rejected");
            return Err(EngineError::Write(format!(
                "warehouse returned {}: {}",
                status, body
            )));
        }

        if let Ok(parsed) = serde_json::from_str::<InsertResponse>(&body) {
            if !parsed.errors.is_empty() {
                error!(errors = parsed.errors.len(), "Warehouse reported row errors");
                return Err(EngineError::Write(format!(
                    "failed to insert anomalies: {}",
                    serde_json::Value::from(parsed.errors)
                )));
            }
        }

        info!(count = rows.len(), "Wrote anomalies to warehouse");
        Ok(())
    }

    fn name(&self) -> &str {
        "warehouse"
    }
}
