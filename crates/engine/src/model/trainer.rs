//! Model training, metadata and validation

use super::forest::IsolationForest;
use super::params::TrainingParams;
use super::AnomalyModel;
use crate::error::{EngineError, Result};
use crate::features::stats;
use crate::models::{FeatureMatrix, ModelMetadata};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Train an isolation forest on a dense feature matrix
///
/// Fails with [`EngineError::InvalidInput`] on an empty matrix or on invalid
/// hyperparameters, before any tree is grown. Identical input and
/// `random_state` always produce identical scores.
pub fn train_isolation_forest(matrix: &FeatureMatrix, params: &TrainingParams) -> Result<IsolationForest> {
    if matrix.is_empty() {
        return Err(EngineError::InvalidInput(
            "cannot train model on empty feature matrix".to_string(),
        ));
    }
    params.validate()?;

    info!(
        samples = matrix.n_rows(),
        features = matrix.n_features(),
        contamination = params.contamination,
        n_estimators = params.n_estimators,
        max_samples = %params.max_samples,
        random_state = params.random_state,
        "Training IsolationForest"
    );

    let start = Instant::now();
    let model = IsolationForest::fit(matrix, params)?;

    let scores = model.decision_function(matrix)?;
    let anomalies = scores.iter().filter(|s| **s < 0.0).count();
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        anomalies,
        samples = matrix.n_rows(),
        "Model training complete"
    );
    debug!(
        min_score = min,
        max_score = max,
        mean_score = stats::mean(&scores).unwrap_or(0.0),
        std_score = stats::population_std(&scores),
        "Training score distribution"
    );

    Ok(model)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Describe a trained model and how it behaves on its training data
pub fn model_metadata(model: &IsolationForest, matrix: &FeatureMatrix) -> Result<ModelMetadata> {
    let predictions = model.predict(matrix)?;
    let anomalies = predictions.iter().filter(|p| **p == -1).count();
    let rate = if predictions.is_empty() {
        0.0
    } else {
        anomalies as f64 / predictions.len() as f64 * 100.0
    };

    Ok(ModelMetadata {
        n_samples: matrix.n_rows(),
        n_features: matrix.n_features(),
        feature_names: matrix.feature_names.clone(),
        hyperparameters: model.params().to_map(),
        training_anomaly_rate: round_to(rate, 2),
        model_type: model.model_type().to_string(),
        trained_at: chrono::Utc::now(),
    })
}

/// Behaviour of a model on held-out data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub val_samples: usize,
    pub val_anomalies: usize,
    /// Percentage, two decimals
    pub val_anomaly_rate: f64,
    pub val_mean_score: f64,
    pub val_std_score: f64,
}

/// Score a validation set; `None` when it is empty
pub fn validate_model(model: &dyn AnomalyModel, matrix: &FeatureMatrix) -> Result<Option<ValidationMetrics>> {
    if matrix.is_empty() {
        return Ok(None);
    }

    let predictions = model.predict(matrix)?;
    let scores = model.decision_function(matrix)?;
    let anomalies = predictions.iter().filter(|p| **p == -1).count();

    let metrics = ValidationMetrics {
        val_samples: matrix.n_rows(),
        val_anomalies: anomalies,
        val_anomaly_rate: round_to(anomalies as f64 / matrix.n_rows() as f64 * 100.0, 2),
        val_mean_score: round_to(stats::mean(&scores).unwrap_or(0.0), 4),
        val_std_score: round_to(stats::population_std(&scores), 4),
    };
    info!(
        samples = metrics.val_samples,
        anomalies = metrics.val_anomalies,
        rate = metrics.val_anomaly_rate,
        "Validation complete"
    );
    Ok(Some(metrics))
}
