//! Feature matrix construction for model training
//!
//! Turns a table of wide metric rows (one column per metric, values may be
//! missing) into a dense [`FeatureMatrix`] with a configurable policy for
//! missing values.

use super::stats;
use crate::error::{EngineError, Result};
use crate::models::{FeatureMatrix, MetricName};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// One timestamp worth of metrics for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    #[serde(default)]
    pub cpu_usage: Option<f64>,
    #[serde(default)]
    pub memory_usage: Option<f64>,
    #[serde(default)]
    pub latency_p95: Option<f64>,
    #[serde(default)]
    pub request_rate: Option<f64>,
    #[serde(default)]
    pub error_rate: Option<f64>,
}

impl MetricRow {
    pub fn new(timestamp: DateTime<Utc>, service_name: impl Into<String>) -> Self {
        Self {
            timestamp,
            service_name: service_name.into(),
            cpu_usage: None,
            memory_usage: None,
            latency_p95: None,
            request_rate: None,
            error_rate: None,
        }
    }

    pub fn get(&self, metric: MetricName) -> Option<f64> {
        match metric {
            MetricName::CpuUsage => self.cpu_usage,
            MetricName::MemoryUsage => self.memory_usage,
            MetricName::LatencyP95 => self.latency_p95,
            MetricName::RequestRate => self.request_rate,
            MetricName::ErrorRate => self.error_rate,
        }
    }

    pub fn set(&mut self, metric: MetricName, value: Option<f64>) {
        let slot = match metric {
            MetricName::CpuUsage => &mut self.cpu_usage,
            MetricName::MemoryUsage => &mut self.memory_usage,
            MetricName::LatencyP95 => &mut self.latency_p95,
            MetricName::RequestRate => &mut self.request_rate,
            MetricName::ErrorRate => &mut self.error_rate,
        };
        *slot = value;
    }

    pub fn with(mut self, metric: MetricName, value: f64) -> Self {
        self.set(metric, Some(value));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Column {
    name: String,
    values: Vec<Option<f64>>,
}

/// Columnar table of metric rows with optional extra numeric columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricTable {
    timestamps: Vec<DateTime<Utc>>,
    service_names: Vec<String>,
    columns: Vec<Column>,
}

impl MetricTable {
    pub fn from_rows(rows: &[MetricRow]) -> Self {
        let columns = MetricName::ALL
            .iter()
            .map(|m| Column {
                name: m.as_str().to_string(),
                values: rows.iter().map(|r| r.get(*m)).collect(),
            })
            .collect();

        Self {
            timestamps: rows.iter().map(|r| r.timestamp).collect(),
            service_names: rows.iter().map(|r| r.service_name.clone()).collect(),
            columns,
        }
    }

    /// Add or replace a numeric column
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<Self> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(EngineError::InvalidInput(format!(
                "column {} has {} values, table has {} rows",
                name,
                values.len(),
                self.len()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn service_names(&self) -> &[String] {
        &self.service_names
    }

    /// All column names, identifier columns first
    pub fn column_names(&self) -> Vec<String> {
        let mut names = vec!["timestamp".to_string(), "service_name".to_string()];
        names.extend(self.columns.iter().map(|c| c.name.clone()));
        names
    }

    fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Policy for missing feature values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillStrategy {
    #[default]
    Median,
    Mean,
    Zero,
    Drop,
}

impl fmt::Display for FillStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillStrategy::Median => write!(f, "median"),
            FillStrategy::Mean => write!(f, "mean"),
            FillStrategy::Zero => write!(f, "zero"),
            FillStrategy::Drop => write!(f, "drop"),
        }
    }
}

impl FromStr for FillStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "median" => Ok(FillStrategy::Median),
            "mean" => Ok(FillStrategy::Mean),
            "zero" => Ok(FillStrategy::Zero),
            "drop" => Ok(FillStrategy::Drop),
            other => Err(EngineError::Configuration(format!(
                "invalid fill_strategy: {}. Must be one of: median, mean, zero, drop",
                other
            ))),
        }
    }
}

/// Build a dense feature matrix from a metric table
///
/// `feature_columns` defaults to the five canonical metrics. The output has
/// exactly the requested columns in the requested order and no missing
/// values; only [`FillStrategy::Drop`] changes the row count.
pub fn build_feature_matrix(
    table: &MetricTable,
    feature_columns: Option<&[String]>,
    strategy: FillStrategy,
) -> Result<FeatureMatrix> {
    let requested: Vec<String> = match feature_columns {
        Some(cols) => cols.to_vec(),
        None => MetricName::column_names(),
    };

    if table.is_empty() {
        warn!("Empty table provided to build_feature_matrix");
        return FeatureMatrix::new(requested, Vec::new());
    }

    let missing: Vec<String> = requested
        .iter()
        .filter(|c| table.column(c).is_none())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::Schema {
            missing,
            available: table.column_names(),
        });
    }

    let mut columns: Vec<Vec<Option<f64>>> = requested
        .iter()
        .filter_map(|c| table.column(c))
        .map(|c| c.values.clone())
        .collect();

    let total_missing: usize = columns
        .iter()
        .map(|c| c.iter().filter(|v| v.is_none()).count())
        .sum();
    if total_missing > 0 {
        info!(
            missing = total_missing,
            features = requested.len(),
            strategy = %strategy,
            "Found missing values in feature columns"
        );
    }

    match strategy {
        FillStrategy::Median | FillStrategy::Mean => {
            for (name, column) in requested.iter().zip(columns.iter_mut()) {
                if column.iter().all(|v| v.is_some()) {
                    continue;
                }
                let present: Vec<f64> = column.iter().flatten().copied().collect();
                let fill = match strategy {
                    FillStrategy::Median => stats::median(&present),
                    _ => stats::mean(&present),
                };
                let Some(fill) = fill else {
                    return Err(EngineError::DataQuality(format!(
                        "column {} is entirely null; {} fill is undefined",
                        name, strategy
                    )));
                };
                debug!(column = %name, fill, strategy = %strategy, "Filled missing values");
                for v in column.iter_mut().filter(|v| v.is_none()) {
                    *v = Some(fill);
                }
            }
        }
        FillStrategy::Zero => {
            for v in columns.iter_mut().flatten().filter(|v| v.is_none()) {
                *v = Some(0.0);
            }
        }
        FillStrategy::Drop => {}
    }

    let mut rows = Vec::with_capacity(table.len());
    for i in 0..table.len() {
        let row: Option<Vec<f64>> = columns.iter().map(|c| c[i]).collect();
        match row {
            Some(r) => rows.push(r),
            None if strategy == FillStrategy::Drop => {}
            None => {
                return Err(EngineError::DataQuality(
                    "feature matrix still contains missing values after processing".to_string(),
                ))
            }
        }
    }

    if strategy == FillStrategy::Drop && rows.len() < table.len() {
        info!(dropped = table.len() - rows.len(), "Dropped rows with missing values");
    }

    info!(
        samples = rows.len(),
        features = requested.len(),
        "Built feature matrix"
    );

    FeatureMatrix::new(requested, rows)
}

/// Add `hour`, `day_of_week` (Monday = 0) and `is_weekend` columns
pub fn add_time_features(table: MetricTable) -> Result<MetricTable> {
    let hours = table
        .timestamps()
        .iter()
        .map(|t| Some(t.hour() as f64))
        .collect();
    let days: Vec<Option<f64>> = table
        .timestamps()
        .iter()
        .map(|t| Some(t.weekday().num_days_from_monday() as f64))
        .collect();
    let weekend = days
        .iter()
        .map(|d| d.map(|d| if d >= 5.0 { 1.0 } else { 0.0 }))
        .collect();

    debug!("Added time features: hour, day_of_week, is_weekend");

    table
        .with_column("hour", hours)?
        .with_column("day_of_week", days)?
        .with_column("is_weekend", weekend)
}

/// Normalize each column to zero mean and unit variance
///
/// Constant columns normalize to 0.0 rather than NaN.
pub fn normalize_features(matrix: &FeatureMatrix) -> FeatureMatrix {
    let params: Vec<(f64, f64)> = (0..matrix.n_features())
        .map(|j| {
            let col: Vec<f64> = matrix.column(j).collect();
            (stats::mean(&col).unwrap_or(0.0), stats::sample_std(&col))
        })
        .collect();

    let rows = matrix
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(&params)
                .map(|(v, (m, s))| if *s > 0.0 { (v - m) / s } else { 0.0 })
                .collect()
        })
        .collect();

    FeatureMatrix {
        feature_names: matrix.feature_names.clone(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap() + Duration::minutes(10 * i)
    }

    fn complete_row(i: i64, cpu: f64) -> MetricRow {
        MetricRow::new(ts(i), "api")
            .with(MetricName::CpuUsage, cpu)
            .with(MetricName::MemoryUsage, 60.0)
            .with(MetricName::LatencyP95, 120.0)
            .with(MetricName::RequestRate, 1000.0)
            .with(MetricName::ErrorRate, 0.5)
    }

    fn table_with_gaps() -> MetricTable {
        let mut rows = vec![
            complete_row(0, 70.0),
            complete_row(1, 80.0),
            complete_row(2, 90.0),
            complete_row(3, 100.0),
        ];
        rows[1].set(MetricName::CpuUsage, None);
        rows[3].set(MetricName::MemoryUsage, None);
        MetricTable::from_rows(&rows)
    }

    #[test]
    fn test_default_columns_and_shape() {
        let rows: Vec<_> = (0..5).map(|i| complete_row(i, 70.0 + i as f64)).collect();
        let matrix = build_feature_matrix(&MetricTable::from_rows(&rows), None, FillStrategy::Median).unwrap();
        assert_eq!(matrix.n_rows(), 5);
        assert_eq!(matrix.feature_names, MetricName::column_names());
        assert_eq!(matrix.rows[2][0], 72.0);
    }

    #[test]
    fn test_median_fill() {
        let matrix = build_feature_matrix(&table_with_gaps(), None, FillStrategy::Median).unwrap();
        // cpu present: 70, 90, 100 -> median 90
        assert_eq!(matrix.rows[1][0], 90.0);
        assert_eq!(matrix.rows[3][1], 60.0);
    }

    #[test]
    fn test_mean_fill() {
        let matrix = build_feature_matrix(&table_with_gaps(), None, FillStrategy::Mean).unwrap();
        assert!((matrix.rows[1][0] - 260.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_fill() {
        let matrix = build_feature_matrix(&table_with_gaps(), None, FillStrategy::Zero).unwrap();
        assert_eq!(matrix.n_rows(), 4);
        assert_eq!(matrix.rows[1][0], 0.0);
        assert_eq!(matrix.rows[3][1], 0.0);
    }

    #[test]
    fn test_drop_removes_rows_with_nulls() {
        let matrix = build_feature_matrix(&table_with_gaps(), None, FillStrategy::Drop).unwrap();
        assert_eq!(matrix.n_rows(), 2);
        assert_eq!(matrix.rows[0][0], 70.0);
        assert_eq!(matrix.rows[1][0], 90.0);
    }

    #[test]
    fn test_drop_only_considers_selected_columns() {
        let columns = vec!["cpu_usage".to_string(), "latency_p95".to_string()];
        let matrix =
            build_feature_matrix(&table_with_gaps(), Some(&columns), FillStrategy::Drop).unwrap();
        // memory gap in row 3 is ignored
        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(matrix.n_features(), 2);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let columns = vec!["cpu_usage".to_string(), "disk_io".to_string()];
        let err = build_feature_matrix(&table_with_gaps(), Some(&columns), FillStrategy::Median)
            .unwrap_err();
        match err {
            EngineError::Schema { missing, available } => {
                assert_eq!(missing, vec!["disk_io".to_string()]);
                assert!(available.contains(&"cpu_usage".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_strategy_is_configuration_error() {
        let err = "interpolate".parse::<FillStrategy>().unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!("drop".parse::<FillStrategy>().unwrap(), FillStrategy::Drop);
    }

    #[test]
    fn test_fully_null_column_fails_for_median_and_mean() {
        let mut rows = vec![complete_row(0, 70.0), complete_row(1, 75.0)];
        for r in rows.iter_mut() {
            r.set(MetricName::ErrorRate, None);
        }
        let table = MetricTable::from_rows(&rows);
        for strategy in [FillStrategy::Median, FillStrategy::Mean] {
            let err = build_feature_matrix(&table, None, strategy).unwrap_err();
            assert!(matches!(err, EngineError::DataQuality(_)));
        }
        let zero = build_feature_matrix(&table, None, FillStrategy::Zero).unwrap();
        assert!(zero.rows.iter().all(|r| r[4] == 0.0));
    }

    #[test]
    fn test_empty_table_returns_empty_matrix() {
        let matrix = build_feature_matrix(&MetricTable::default(), None, FillStrategy::Median).unwrap();
        assert!(matrix.is_empty());
        assert_eq!(matrix.n_features(), 5);
    }

    #[test]
    fn test_time_features() {
        // 2025-01-11 is a Saturday
        let row = MetricRow::new(Utc.with_ymd_and_hms(2025, 1, 11, 14, 0, 0).unwrap(), "api")
            .with(MetricName::CpuUsage, 70.0);
        let table = add_time_features(MetricTable::from_rows(&[row])).unwrap();
        let columns = vec!["hour".to_string(), "day_of_week".to_string(), "is_weekend".to_string()];
        let matrix = build_feature_matrix(&table, Some(&columns), FillStrategy::Zero).unwrap();
        assert_eq!(matrix.rows[0], vec![14.0, 5.0, 1.0]);
    }

    #[test]
    fn test_normalize_features() {
        let matrix = FeatureMatrix::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0]],
        )
        .unwrap();
        let normalized = normalize_features(&matrix);
        assert_eq!(normalized.rows[1][0], 0.0);
        assert!((normalized.rows[2][0] - 1.0).abs() < 1e-12);
        assert!(normalized.rows.iter().all(|r| r[1] == 0.0));
    }
}
