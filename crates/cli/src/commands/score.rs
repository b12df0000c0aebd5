//! Offline scoring of one batch message file

use anomaly_engine::{
    scoring::{filter_anomalies, Scorer},
    store::{LocalModelStore, ModelStore},
    subscriber::parse_batch,
    AnomalyResult,
};
use anyhow::{Context, Result};
use std::path::Path;
use tabled::Tabled;

use crate::output::{color_severity, format_score, print_info, print_json, print_table, OutputFormat};

/// Row for the scoring results table
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Anomaly")]
    anomaly: String,
}

impl From<&AnomalyResult> for ResultRow {
    fn from(result: &AnomalyResult) -> Self {
        Self {
            timestamp: result.timestamp.to_rfc3339(),
            metric: result.metric_name.clone(),
            value: format!("{:.2}", result.value),
            score: format_score(result.anomaly_score),
            severity: color_severity(result.severity),
            anomaly: if result.is_anomaly { "yes" } else { "no" }.to_string(),
        }
    }
}

/// Score a batch file against the stored model of its service
pub async fn score_file(
    model_dir: &Path,
    batch: &Path,
    service: Option<String>,
    threshold: f64,
    all: bool,
    format: OutputFormat,
) -> Result<()> {
    let data = std::fs::read(batch).with_context(|| format!("Failed to read {}", batch.display()))?;
    let readings = parse_batch(&data).with_context(|| format!("Invalid batch in {}", batch.display()))?;
    if readings.is_empty() {
        anyhow::bail!("Batch in {} has no metrics", batch.display());
    }

    let service = service.unwrap_or_else(|| readings[0].service_name.clone());
    let store = LocalModelStore::new(model_dir)
        .with_context(|| format!("Failed to open model store at {}", model_dir.display()))?;
    let model = store
        .load(&service)
        .await
        .with_context(|| format!("Failed to load model for {}", service))?;

    let results = Scorer::new(threshold).score_batch(&readings, &model)?;
    let scored = results.len();
    let shown = if all { results } else { filter_anomalies(results) };

    match format {
        OutputFormat::Json => print_json(&shown)?,
        OutputFormat::Table => {
            let rows: Vec<ResultRow> = shown.iter().map(ResultRow::from).collect();
            print_table(&rows);
            let anomalies = shown.iter().filter(|r| r.is_anomaly).count();
            print_info(&format!(
                "{} of {} readings scored, {} anomalous ({})",
                scored,
                readings.len(),
                anomalies,
                service
            ));
        }
    }

    Ok(())
}
