//! Online scoring of metric readings against a trained model

mod severity;

pub use severity::Severity;

use crate::error::{EngineError, Result};
use crate::features::reconstruct_features;
use crate::model::AnomalyModel;
use crate::models::{AnomalyResult, FeatureMatrix, MetricReading, ResultMetadata};
use crate::observability::EngineMetrics;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Default decision threshold; scores below it are anomalous
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.0;

/// Scores batches of readings one reading at a time
#[derive(Clone)]
pub struct Scorer {
    score_threshold: f64,
    metrics: EngineMetrics,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(DEFAULT_SCORE_THRESHOLD)
    }
}

impl Scorer {
    pub fn new(score_threshold: f64) -> Self {
        Self {
            score_threshold,
            metrics: EngineMetrics::new(),
        }
    }

    pub fn score_threshold(&self) -> f64 {
        self.score_threshold
    }

    /// Score every reading of a batch
    ///
    /// Readings that cannot be scored are logged and skipped; the remaining
    /// results keep input order. Only an empty batch is an error.
    pub fn score_batch(
        &self,
        readings: &[MetricReading],
        model: &dyn AnomalyModel,
    ) -> Result<Vec<AnomalyResult>> {
        if readings.is_empty() {
            return Err(EngineError::InvalidInput(
                "metrics list cannot be empty".to_string(),
            ));
        }

        debug!(readings = readings.len(), "Scoring batch");

        let mut results = Vec::with_capacity(readings.len());
        let mut errors = 0usize;
        for reading in readings {
            match self.score_reading(reading, readings, model) {
                Ok(result) => {
                    if result.is_anomaly {
                        warn!(
                            service = %result.service_name,
                            metric = %result.metric_name,
                            value = result.value,
                            score = result.anomaly_score,
                            severity = %result.severity,
                            "Anomaly detected"
                        );
                    }
                    results.push(result);
                }
                Err(e) => {
                    errors += 1;
                    self.metrics.inc_scoring_errors();
                    warn!(
                        service = %reading.service_name,
                        metric = %reading.metric_name,
                        error = %e,
                        "Failed to score reading, skipping"
                    );
                }
            }
        }

        self.metrics.add_readings_scored(results.len() as u64);
        info!(
            scored = results.len(),
            anomalies = results.iter().filter(|r| r.is_anomaly).count(),
            errors,
            "Scored batch"
        );
        Ok(results)
    }

    fn score_reading(
        &self,
        reading: &MetricReading,
        batch: &[MetricReading],
        model: &dyn AnomalyModel,
    ) -> Result<AnomalyResult> {
        let features = reconstruct_features(reading, batch)?;
        let x = FeatureMatrix::from_vector(&features);

        let prediction = first(model.predict(&x)?)?;
        let score = first(model.decision_function(&x)?)?;
        let is_anomaly = prediction == -1 || score < self.score_threshold;

        Ok(AnomalyResult {
            timestamp: reading.timestamp,
            service_name: reading.service_name.clone(),
            metric_name: reading.metric_name.clone(),
            value: reading.value,
            is_anomaly,
            anomaly_score: score,
            severity: Severity::from_score(score),
            metadata: ResultMetadata {
                tags: reading.tags.clone(),
                model_prediction: prediction,
                score_threshold: self.score_threshold,
            },
        })
    }
}

fn first<T>(values: Vec<T>) -> Result<T> {
    values
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::InvalidInput("model returned no output".to_string()))
}

/// Keep only anomalous results, preserving order
pub fn filter_anomalies(results: Vec<AnomalyResult>) -> Vec<AnomalyResult> {
    let total = results.len();
    let anomalies: Vec<_> = results.into_iter().filter(|r| r.is_anomaly).collect();
    debug!(anomalies = anomalies.len(), total, "Filtered anomalies");
    anomalies
}

/// Group results by service, preserving order within each group
pub fn group_by_service(results: Vec<AnomalyResult>) -> BTreeMap<String, Vec<AnomalyResult>> {
    let mut grouped: BTreeMap<String, Vec<AnomalyResult>> = BTreeMap::new();
    for result in results {
        grouped
            .entry(result.service_name.clone())
            .or_default()
            .push(result);
    }
    grouped
}
