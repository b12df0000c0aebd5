//! Unsupervised anomaly model: isolation forest training and inference

mod forest;
mod params;
mod pipeline;
mod trainer;

pub use forest::{average_path_length, IsolationForest, IsolationTree};
pub use params::{
    MaxSamples, TrainingParams, DEFAULT_CONTAMINATION, DEFAULT_N_ESTIMATORS, DEFAULT_RANDOM_STATE,
};
pub use pipeline::{train_service, TrainingInput, TrainingOptions, TrainingReport};
pub use trainer::{model_metadata, train_isolation_forest, validate_model, ValidationMetrics};

use crate::error::Result;
use crate::models::FeatureMatrix;

/// Inference interface used by the scorer
pub trait AnomalyModel: Send + Sync {
    /// -1 for anomalous rows, +1 for normal rows
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<i32>>;

    /// Signed score per row, negative means anomalous
    fn decision_function(&self, x: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Width of the matrices the model accepts
    fn n_features(&self) -> usize;

    fn model_type(&self) -> &str;
}
