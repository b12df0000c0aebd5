//! Downstream sinks for detected anomalies
//!
//! Writers persist anomalies and must succeed before a batch is acked.
//! Publishers fan anomaly events out to consumers on a best-effort basis.

mod publisher;
mod writer;

pub use publisher::{LogPublisher, WebhookPublisher};
pub use writer::{JsonlFileWriter, LogWriter, WarehouseRow, WarehouseWriter};

use crate::error::{EngineError, Result};
use crate::models::AnomalyResult;
use async_trait::async_trait;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Timeout applied to every outbound sink request
pub const SINK_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Persists anomaly results
#[async_trait]
pub trait AnomalyWriter: Send + Sync {
    async fn write(&self, anomalies: &[AnomalyResult]) -> Result<()>;

    /// Short name for logs and health messages
    fn name(&self) -> &str;
}

/// Publishes anomaly events to downstream consumers
#[async_trait]
pub trait AnomalyPublisher: Send + Sync {
    async fn publish(&self, anomalies: &[AnomalyResult]) -> Result<()>;

    fn name(&self) -> &str;
}

/// Writer implementation selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    Log,
    File,
    Warehouse,
}

impl FromStr for WriterKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "log" | "stub" => Ok(WriterKind::Log),
            "file" | "local" => Ok(WriterKind::File),
            "warehouse" => Ok(WriterKind::Warehouse),
            other => Err(EngineError::Configuration(format!(
                "unknown writer: {}. Must be one of: log, file, warehouse",
                other
            ))),
        }
    }
}

/// Publisher implementation selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherKind {
    Log,
    Webhook,
}

impl FromStr for PublisherKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "log" | "stub" => Ok(PublisherKind::Log),
            "webhook" => Ok(PublisherKind::Webhook),
            other => Err(EngineError::Configuration(format!(
                "unknown publisher: {}. Must be one of: log, webhook",
                other
            ))),
        }
    }
}

/// Build the configured writer
///
/// `file` needs `path` and `warehouse` needs `endpoint`.
pub fn build_writer(
    kind: WriterKind,
    path: Option<&Path>,
    endpoint: Option<&str>,
) -> Result<Arc<dyn AnomalyWriter>> {
    match kind {
        WriterKind::Log => Ok(Arc::new(LogWriter)),
        WriterKind::File => {
            let path = path.ok_or_else(|| {
                EngineError::Configuration("file writer requires a writer path".to_string())
            })?;
            Ok(Arc::new(JsonlFileWriter::new(path)?))
        }
        WriterKind::Warehouse => {
            let endpoint = endpoint.ok_or_else(|| {
                EngineError::Configuration("warehouse writer requires a warehouse URL".to_string())
            })?;
            Ok(Arc::new(WarehouseWriter::new(endpoint)?))
        }
    }
}

/// Build the configured publisher; `webhook` needs `endpoint`
pub fn build_publisher(kind: PublisherKind, endpoint: Option<&str>) -> Result<Arc<dyn AnomalyPublisher>> {
    match kind {
        PublisherKind::Log => Ok(Arc::new(LogPublisher)),
        PublisherKind::Webhook => {
            let endpoint = endpoint.ok_or_else(|| {
                EngineError::Configuration("webhook publisher requires a webhook URL".to_string())
            })?;
            Ok(Arc::new(WebhookPublisher::new(endpoint)?))
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(SINK_HTTP_TIMEOUT)
        .build()
        .map_err(EngineError::from)
}

pub(crate) fn parse_endpoint(endpoint: &str) -> Result<url::Url> {
    url::Url::parse(endpoint)
        .map_err(|e| EngineError::Configuration(format!("invalid sink URL {}: {}", endpoint, e)))
}
