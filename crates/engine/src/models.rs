//! Core data models for the anomaly engine

use crate::error::{EngineError, Result};
use crate::scoring::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical metric names, in feature column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    CpuUsage,
    MemoryUsage,
    #[serde(rename = "latency_p95")]
    LatencyP95,
    RequestRate,
    ErrorRate,
}

impl MetricName {
    pub const ALL: [MetricName; 5] = [
        MetricName::CpuUsage,
        MetricName::MemoryUsage,
        MetricName::LatencyP95,
        MetricName::RequestRate,
        MetricName::ErrorRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CpuUsage => "cpu_usage",
            MetricName::MemoryUsage => "memory_usage",
            MetricName::LatencyP95 => "latency_p95",
            MetricName::RequestRate => "request_rate",
            MetricName::ErrorRate => "error_rate",
        }
    }

    /// Position of this metric in a feature vector
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Canonical column names as owned strings
    pub fn column_names() -> Vec<String> {
        Self::ALL.iter().map(|m| m.as_str().to_string()).collect()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown metric name: {}", s)))
    }
}

/// One observation of one metric for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    /// Wire name; resolved to [`MetricName`] when features are reconstructed
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl MetricReading {
    pub fn new(
        timestamp: DateTime<Utc>,
        service_name: impl Into<String>,
        metric: MetricName,
        value: f64,
    ) -> Self {
        Self {
            timestamp,
            service_name: service_name.into(),
            metric_name: metric.as_str().to_string(),
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Resolve the wire metric name
    pub fn metric(&self) -> Result<MetricName> {
        self.metric_name.parse()
    }
}

/// Fixed-width feature vector with one slot per canonical metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: [f64; 5],
}

impl FeatureVector {
    pub fn new(values: [f64; 5]) -> Self {
        Self { values }
    }

    pub fn get(&self, metric: MetricName) -> f64 {
        self.values[metric.index()]
    }

    pub fn set(&mut self, metric: MetricName, value: f64) {
        self.values[metric.index()] = value;
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Numeric feature matrix with named columns and no missing values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(feature_names: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let width = feature_names.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(EngineError::InvalidInput(format!(
                "row {} has {} values, expected {}",
                bad,
                rows[bad].len(),
                width
            )));
        }
        Ok(Self { feature_names, rows })
    }

    /// Single-row matrix over the canonical columns
    pub fn from_vector(vector: &FeatureVector) -> Self {
        Self {
            feature_names: MetricName::column_names(),
            rows: vec![vector.values.to_vec()],
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |r| r[idx])
    }
}

/// Extra context attached to an anomaly result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub tags: BTreeMap<String, String>,
    /// Raw model label: -1 anomalous, 1 normal
    pub model_prediction: i32,
    pub score_threshold: f64,
}

/// Scoring outcome for one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub metric_name: String,
    pub value: f64,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub severity: Severity,
    pub metadata: ResultMetadata,
}

/// Descriptive record stored next to a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub n_samples: usize,
    pub n_features: usize,
    pub feature_names: Vec<String>,
    pub hyperparameters: BTreeMap<String, serde_json::Value>,
    /// Percentage of training rows flagged anomalous, two decimals
    pub training_anomaly_rate: f64,
    pub model_type: String,
    pub trained_at: DateTime<Utc>,
}
