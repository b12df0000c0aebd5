//! Model training command

use anomaly_engine::{
    features::{load_readings_jsonl, load_rows_jsonl, FillStrategy},
    model::{train_service, MaxSamples, TrainingInput, TrainingOptions, TrainingParams, TrainingReport},
    observability::StructuredLogger,
    store::LocalModelStore,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tabled::Tabled;
use tracing::info;

use crate::output::{format_rate, print_json, print_success, print_table, OutputFormat};
use crate::InputFormat;

/// Parsed `sentry train` arguments
pub struct TrainArgs {
    pub service: String,
    pub input: Option<PathBuf>,
    pub input_format: InputFormat,
    pub days: u32,
    pub seed: u64,
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: MaxSamples,
    pub random_state: u64,
    pub fill_strategy: FillStrategy,
    pub validation_fraction: f64,
}

/// Row for the training summary table
#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn load_input(args: &TrainArgs) -> Result<TrainingInput> {
    let Some(path) = &args.input else {
        info!(days = args.days, seed = args.seed, "No input file, generating synthetic history");
        return Ok(TrainingInput::Synthetic {
            days: args.days,
            seed: args.seed,
        });
    };

    let service = Some(args.service.as_str());
    let input = match args.input_format {
        InputFormat::Readings => TrainingInput::Readings(
            load_readings_jsonl(path, service)
                .with_context(|| format!("Failed to load readings from {}", path.display()))?,
        ),
        InputFormat::Rows => TrainingInput::Rows(
            load_rows_jsonl(path, service)
                .with_context(|| format!("Failed to load rows from {}", path.display()))?,
        ),
    };
    Ok(input)
}

/// Train a model for one service and save it under `model_dir`
pub async fn train(model_dir: &Path, args: TrainArgs, format: OutputFormat) -> Result<()> {
    let store = LocalModelStore::new(model_dir)
        .with_context(|| format!("Failed to open model store at {}", model_dir.display()))?;

    let input = load_input(&args)?;
    let options = TrainingOptions {
        fill: args.fill_strategy,
        params: TrainingParams {
            contamination: args.contamination,
            n_estimators: args.n_estimators,
            max_samples: args.max_samples,
            random_state: args.random_state,
        },
        validation_fraction: args.validation_fraction,
    };

    let report = train_service(&store, &args.service, input, &options)
        .await
        .with_context(|| format!("Training failed for service {}", args.service))?;

    StructuredLogger::new("sentry-cli").log_model_trained(
        &report.service_name,
        report.metadata.n_samples,
        report.metadata.training_anomaly_rate,
        &report.location,
    );

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_table(&summary_rows(&report));
            print_success(&format!("Model saved to {}", report.location));
        }
    }

    Ok(())
}

fn summary_rows(report: &TrainingReport) -> Vec<SummaryRow> {
    let mut rows = vec![
        SummaryRow {
            field: "Service",
            value: report.service_name.clone(),
        },
        SummaryRow {
            field: "History rows",
            value: report.history_rows.to_string(),
        },
        SummaryRow {
            field: "Samples",
            value: report.metadata.n_samples.to_string(),
        },
        SummaryRow {
            field: "Features",
            value: report.metadata.feature_names.join(", "),
        },
        SummaryRow {
            field: "Fill strategy",
            value: report.fill_strategy.to_string(),
        },
        SummaryRow {
            field: "Training anomaly rate",
            value: format_rate(report.metadata.training_anomaly_rate),
        },
    ];

    if let (Some(first), Some(last)) = (report.first_timestamp, report.last_timestamp) {
        rows.push(SummaryRow {
            field: "Date range",
            value: format!("{} to {}", first.to_rfc3339(), last.to_rfc3339()),
        });
    }
    if let Some(validation) = &report.validation {
        rows.push(SummaryRow {
            field: "Validation samples",
            value: validation.val_samples.to_string(),
        });
        rows.push(SummaryRow {
            field: "Validation anomaly rate",
            value: format_rate(validation.val_anomaly_rate),
        });
    }
    rows
}
