//! End-to-end training of one service model: load, featurize, train, save

use super::forest::IsolationForest;
use super::params::TrainingParams;
use super::trainer::{model_metadata, train_isolation_forest, validate_model, ValidationMetrics};
use crate::error::{EngineError, Result};
use crate::features::{build_feature_matrix, pivot_readings, synthetic_history, FillStrategy, MetricRow, MetricTable};
use crate::models::{FeatureMatrix, MetricReading, ModelMetadata};
use crate::store::ModelStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Where training history comes from
#[derive(Debug, Clone)]
pub enum TrainingInput {
    /// Wide rows, one per timestamp
    Rows(Vec<MetricRow>),
    /// Long-form readings, pivoted before use
    Readings(Vec<MetricReading>),
    /// Generated history ending at the current hour
    Synthetic { days: u32, seed: u64 },
}

/// Knobs for [`train_service`]
#[derive(Debug, Clone, Default)]
pub struct TrainingOptions {
    pub fill: FillStrategy,
    pub params: TrainingParams,
    /// Share of the most recent rows held out for validation, in `[0, 1)`
    pub validation_fraction: f64,
}

/// Summary of a finished training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub service_name: String,
    pub location: String,
    pub fill_strategy: FillStrategy,
    pub history_rows: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub metadata: ModelMetadata,
    pub validation: Option<ValidationMetrics>,
}

/// Train a model for `service` and save it to `store`
///
/// Rows and readings belonging to other services are ignored. The model is
/// trained on the canonical metric columns only, which is what the online
/// scorer feeds it. Nothing is written unless training succeeds.
pub async fn train_service(
    store: &dyn ModelStore,
    service: &str,
    input: TrainingInput,
    options: &TrainingOptions,
) -> Result<TrainingReport> {
    if !(0.0..1.0).contains(&options.validation_fraction) {
        return Err(EngineError::Configuration(format!(
            "validation_fraction must be in [0, 1), got {}",
            options.validation_fraction
        )));
    }

    let mut rows = history_rows(service, input);
    if rows.is_empty() {
        return Err(EngineError::InvalidInput(format!(
            "no data found for service: {}",
            service
        )));
    }
    rows.sort_by_key(|r| r.timestamp);

    let first_timestamp = rows.first().map(|r| r.timestamp);
    let last_timestamp = rows.last().map(|r| r.timestamp);
    info!(
        service = %service,
        rows = rows.len(),
        from = ?first_timestamp,
        to = ?last_timestamp,
        "Loaded training history"
    );

    let matrix = build_feature_matrix(&MetricTable::from_rows(&rows), None, options.fill)?;
    if matrix.is_empty() {
        return Err(EngineError::InvalidInput(
            "feature matrix is empty after processing".to_string(),
        ));
    }

    let (train, holdout) = split_holdout(matrix, options.validation_fraction)?;
    let model: IsolationForest = train_isolation_forest(&train, &options.params)?;
    let metadata = model_metadata(&model, &train)?;
    let validation = validate_model(&model, &holdout)?;

    if let Some(v) = &validation {
        if (v.val_anomaly_rate - metadata.training_anomaly_rate).abs() > 10.0 {
            warn!(
                service = %service,
                training_rate = metadata.training_anomaly_rate,
                validation_rate = v.val_anomaly_rate,
                "Validation anomaly rate diverges from training"
            );
        }
    }

    let location = store.save(service, &model, &metadata).await?;
    info!(
        service = %service,
        samples = metadata.n_samples,
        training_anomaly_rate = metadata.training_anomaly_rate,
        location = %location,
        "Saved trained model"
    );

    Ok(TrainingReport {
        service_name: service.to_string(),
        location,
        fill_strategy: options.fill,
        history_rows: rows.len(),
        first_timestamp,
        last_timestamp,
        metadata,
        validation,
    })
}

fn history_rows(service: &str, input: TrainingInput) -> Vec<MetricRow> {
    match input {
        TrainingInput::Rows(rows) => rows.into_iter().filter(|r| r.service_name == service).collect(),
        TrainingInput::Readings(readings) => {
            let own: Vec<MetricReading> = readings
                .into_iter()
                .filter(|r| r.service_name == service)
                .collect();
            pivot_readings(&own)
        }
        TrainingInput::Synthetic { days, seed } => synthetic_history(service, days, seed),
    }
}

/// Split off the trailing `fraction` of rows
fn split_holdout(matrix: FeatureMatrix, fraction: f64) -> Result<(FeatureMatrix, FeatureMatrix)> {
    let n_holdout = (matrix.n_rows() as f64 * fraction).floor() as usize;
    if n_holdout >= matrix.n_rows() {
        return Err(EngineError::InvalidInput(
            "validation split leaves no training rows".to_string(),
        ));
    }

    let FeatureMatrix { feature_names, mut rows } = matrix;
    let holdout = rows.split_off(rows.len() - n_holdout);
    Ok((
        FeatureMatrix {
            feature_names: feature_names.clone(),
            rows,
        },
        FeatureMatrix {
            feature_names,
            rows: holdout,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnomalyModel;
    use crate::models::MetricName;
    use crate::store::LocalModelStore;
    use chrono::{Duration, TimeZone};

    fn params() -> TrainingParams {
        TrainingParams {
            n_estimators: 16,
            ..Default::default()
        }
    }

    fn options(fraction: f64) -> TrainingOptions {
        TrainingOptions {
            params: params(),
            validation_fraction: fraction,
            ..Default::default()
        }
    }

    fn readings(service: &str, n: usize) -> Vec<MetricReading> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..n)
            .flat_map(|i| {
                let ts = start + Duration::minutes(10 * i as i64);
                let x = (i % 9) as f64;
                vec![
                    MetricReading::new(ts, service, MetricName::CpuUsage, 65.0 + x),
                    MetricReading::new(ts, service, MetricName::MemoryUsage, 55.0 + x / 2.0),
                    MetricReading::new(ts, service, MetricName::LatencyP95, 110.0 + x * 3.0),
                    MetricReading::new(ts, service, MetricName::RequestRate, 950.0 + x * 10.0),
                    MetricReading::new(ts, service, MetricName::ErrorRate, 0.4 + x / 100.0),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_train_service_from_readings_saves_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalModelStore::new(dir.path()).unwrap();
        let mut input = readings("frontend-api", 60);
        input.extend(readings("checkout", 5));

        let report = train_service(&store, "frontend-api", TrainingInput::Readings(input), &options(0.0))
            .await
            .unwrap();

        assert_eq!(report.history_rows, 60);
        assert_eq!(report.metadata.n_samples, 60);
        assert_eq!(report.metadata.feature_names, MetricName::column_names());
        assert!(report.validation.is_none());
        assert!(store.exists("frontend-api").await.unwrap());
        assert!(!store.exists("checkout").await.unwrap());

        let loaded = store.load("frontend-api").await.unwrap();
        assert_eq!(loaded.n_features(), 5);
    }

    #[tokio::test]
    async fn test_holdout_produces_validation_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalModelStore::new(dir.path()).unwrap();

        let report = train_service(
            &store,
            "frontend-api",
            TrainingInput::Readings(readings("frontend-api", 100)),
            &options(0.2),
        )
        .await
        .unwrap();

        assert_eq!(report.metadata.n_samples, 80);
        assert_eq!(report.validation.unwrap().val_samples, 20);
    }

    #[tokio::test]
    async fn test_synthetic_input_trains() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalModelStore::new(dir.path()).unwrap();

        let report = train_service(
            &store,
            "payments",
            TrainingInput::Synthetic { days: 1, seed: 7 },
            &options(0.0),
        )
        .await
        .unwrap();

        assert_eq!(report.metadata.n_samples, 144);
        assert!(report.first_timestamp < report.last_timestamp);
    }

    #[tokio::test]
    async fn test_unknown_service_is_rejected_without_saving() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalModelStore::new(dir.path()).unwrap();

        let result = train_service(
            &store,
            "ghost",
            TrainingInput::Readings(readings("frontend-api", 10)),
            &options(0.0),
        )
        .await;

        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        assert!(!store.exists("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_validation_fraction() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalModelStore::new(dir.path()).unwrap();

        let result = train_service(
            &store,
            "frontend-api",
            TrainingInput::Readings(readings("frontend-api", 10)),
            &options(1.0),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_split_holdout_keeps_order() {
        let matrix = FeatureMatrix::new(
            vec!["a".to_string()],
            (0..10).map(|i| vec![i as f64]).collect(),
        )
        .unwrap();
        let (train, holdout) = split_holdout(matrix, 0.3).unwrap();
        assert_eq!(train.n_rows(), 7);
        assert_eq!(holdout.rows, vec![vec![7.0], vec![8.0], vec![9.0]]);

        let single = FeatureMatrix::new(vec!["a".to_string()], vec![vec![1.0]]).unwrap();
        assert!(split_holdout(single, 0.5).is_ok());
    }
}
