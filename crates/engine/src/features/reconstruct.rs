//! Per-reading feature reconstruction for online scoring

use crate::error::{EngineError, Result};
use crate::models::{FeatureVector, MetricName, MetricReading};

/// Healthy baseline used for metrics that are absent from a batch
pub const DEFAULT_FEATURES: FeatureVector = FeatureVector {
    values: [70.0, 60.0, 120.0, 1000.0, 0.5],
};

/// Build the full feature vector for one reading
///
/// Starts from [`DEFAULT_FEATURES`], writes the reading's own value, then lets
/// every reading in `batch` with the same timestamp and service overwrite its
/// slot in batch order. The reading itself is usually part of `batch`.
pub fn reconstruct_features(reading: &MetricReading, batch: &[MetricReading]) -> Result<FeatureVector> {
    let own = reading.metric().map_err(|_| {
        EngineError::Reconstruction(format!(
            "unknown metric {} for service {}",
            reading.metric_name, reading.service_name
        ))
    })?;

    let mut vector = DEFAULT_FEATURES;
    vector.set(own, reading.value);

    for sibling in batch
        .iter()
        .filter(|m| m.timestamp == reading.timestamp && m.service_name == reading.service_name)
    {
        if let Ok(metric) = sibling.metric_name.parse::<MetricName>() {
            vector.set(metric, sibling.value);
        }
    }

    if !vector.is_finite() {
        return Err(EngineError::Reconstruction(format!(
            "non-finite feature value for {}/{} at {}",
            reading.service_name, reading.metric_name, reading.timestamp
        )));
    }

    Ok(vector)
}
