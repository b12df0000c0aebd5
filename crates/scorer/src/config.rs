//! Scorer configuration

use anomaly_engine::{
    scoring::DEFAULT_SCORE_THRESHOLD,
    sink::{PublisherKind, WriterKind},
    store::StoreBackend,
    subscriber::DEFAULT_MAX_WORKERS,
    EngineError,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "SCORER_CONFIG_FILE";

/// Online scorer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScorerConfig {
    /// Node name used in structured log events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Port for push delivery, health, metrics and admin routes
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_store_backend")]
    pub store_backend: String,

    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Messages processed concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Push deliveries queued ahead of the workers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a push request waits for its disposition
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// `log`, `file` or `warehouse`
    #[serde(default = "default_sink")]
    pub writer: String,

    #[serde(default)]
    pub writer_path: Option<PathBuf>,

    #[serde(default)]
    pub warehouse_url: Option<String>,

    /// `log` or `webhook`
    #[serde(default = "default_sink")]
    pub publisher: String,

    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./models")
}

fn default_store_backend() -> String {
    "local".to_string()
}

fn default_score_threshold() -> f64 {
    DEFAULT_SCORE_THRESHOLD
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_queue_capacity() -> usize {
    64
}

fn default_delivery_timeout() -> u64 {
    30
}

fn default_sink() -> String {
    "log".to_string()
}

impl ScorerConfig {
    /// Load from the optional config file, overridden by `SCORER_*` variables
    ///
    /// An explicit `file` wins over `SCORER_CONFIG_FILE`. The result is
    /// validated before it is returned.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("SCORER"))
            .build()
            .context("Failed to read scorer configuration")?;

        let scorer: ScorerConfig = config
            .try_deserialize()
            .context("Invalid scorer configuration")?;
        scorer.validate()?;
        Ok(scorer)
    }

    /// Reject settings the service cannot start with
    pub fn validate(&self) -> anomaly_engine::Result<()> {
        if self.max_workers == 0 {
            return Err(EngineError::Configuration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::Configuration(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if !self.score_threshold.is_finite() {
            return Err(EngineError::Configuration(format!(
                "score_threshold must be finite, got {}",
                self.score_threshold
            )));
        }
        if self.delivery_timeout_secs == 0 {
            return Err(EngineError::Configuration(
                "delivery_timeout_secs must be at least 1".to_string(),
            ));
        }

        self.store_backend()?;
        match self.writer_kind()? {
            WriterKind::File if self.writer_path.is_none() => {
                return Err(EngineError::Configuration(
                    "writer 'file' requires writer_path".to_string(),
                ));
            }
            WriterKind::Warehouse => {
                require_url("warehouse_url", self.warehouse_url.as_deref())?;
            }
            _ => {}
        }
        if self.publisher_kind()? == PublisherKind::Webhook {
            require_url("webhook_url", self.webhook_url.as_deref())?;
        }
        Ok(())
    }

    pub fn store_backend(&self) -> anomaly_engine::Result<StoreBackend> {
        self.store_backend.parse()
    }

    pub fn writer_kind(&self) -> anomaly_engine::Result<WriterKind> {
        self.writer.parse()
    }

    pub fn publisher_kind(&self) -> anomaly_engine::Result<PublisherKind> {
        self.publisher.parse()
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

fn require_url(name: &str, value: Option<&str>) -> anomaly_engine::Result<()> {
    let value = value
        .ok_or_else(|| EngineError::Configuration(format!("{} is required", name)))?;
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| EngineError::Configuration(format!("invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let file = write_config("");
        let config = ScorerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.score_threshold, 0.0);
        assert_eq!(config.writer_kind().unwrap(), WriterKind::Log);
        assert_eq!(config.publisher_kind().unwrap(), PublisherKind::Log);
        assert_eq!(config.delivery_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_file_values_are_used() {
        let file = write_config(
            r#"
            api_port = 9100
            max_workers = 8
            score_threshold = -0.1
            writer = "warehouse"
            warehouse_url = "http://warehouse:9000/insert"
            publisher = "webhook"
            webhook_url = "http://events:8000/anomalies"
            "#,
        );
        let config = ScorerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.writer_kind().unwrap(), WriterKind::Warehouse);
        assert_eq!(config.publisher_kind().unwrap(), PublisherKind::Webhook);
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(ScorerConfig::load(Some(Path::new("/nonexistent/scorer.toml"))).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let file = write_config("");
        let base = ScorerConfig::load(Some(file.path())).unwrap();

        let zero_workers = ScorerConfig {
            max_workers: 0,
            ..base.clone()
        };
        assert!(matches!(zero_workers.validate(), Err(EngineError::Configuration(_))));

        let nan_threshold = ScorerConfig {
            score_threshold: f64::NAN,
            ..base.clone()
        };
        assert!(nan_threshold.validate().is_err());

        let unknown_writer = ScorerConfig {
            writer: "bigtable".to_string(),
            ..base.clone()
        };
        assert!(unknown_writer.validate().is_err());

        let file_without_path = ScorerConfig {
            writer: "file".to_string(),
            ..base.clone()
        };
        assert!(file_without_path.validate().is_err());

        let bad_webhook = ScorerConfig {
            publisher: "webhook".to_string(),
            webhook_url: Some("not a url".to_string()),
            ..base.clone()
        };
        assert!(bad_webhook.validate().is_err());

        let gcs = ScorerConfig {
            store_backend: "gcs".to_string(),
            ..base
        };
        assert!(gcs.validate().is_err());
    }
}
