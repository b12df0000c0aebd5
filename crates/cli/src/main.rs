//! AI Ops Sentry CLI
//!
//! Offline tooling for per-service anomaly models: training, inspecting
//! stored models, scoring batch files and replaying message logs through
//! the full subscriber pipeline.

mod commands;
mod output;

use anomaly_engine::{features::FillStrategy, model::MaxSamples};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{inspect, replay, score, train};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// AI Ops Sentry CLI
#[derive(Parser)]
#[command(name = "sentry")]
#[command(author, version, about = "CLI for AI Ops Sentry anomaly models", long_about = None)]
pub struct Cli {
    /// Model store directory (can also be set via SENTRY_MODEL_DIR env var)
    #[arg(long, env = "SENTRY_MODEL_DIR", default_value = "./models", global = true)]
    pub model_dir: PathBuf,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Layout of a training input file
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum InputFormat {
    /// One metric reading per line
    #[default]
    Readings,
    /// One wide row (all metrics at a timestamp) per line
    Rows,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train and save a model for one service
    Train {
        /// Service to train a model for (e.g. frontend-api)
        service: String,

        /// JSONL history file; synthetic history is generated when omitted
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Layout of the input file
        #[arg(long, default_value = "readings")]
        input_format: InputFormat,

        /// Days of synthetic history to generate
        #[arg(long, default_value_t = 7)]
        days: u32,

        /// Seed for synthetic history
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Expected proportion of outliers, in (0, 0.5]
        #[arg(long, default_value_t = anomaly_engine::model::DEFAULT_CONTAMINATION)]
        contamination: f64,

        /// Number of trees in the forest
        #[arg(long, default_value_t = anomaly_engine::model::DEFAULT_N_ESTIMATORS)]
        n_estimators: usize,

        /// Samples per tree: auto, a count, or a fraction such as 0.5
        #[arg(long, default_value = "auto")]
        max_samples: MaxSamples,

        /// Seed for tree construction
        #[arg(long, default_value_t = anomaly_engine::model::DEFAULT_RANDOM_STATE)]
        random_state: u64,

        /// Missing value strategy: median, mean, zero or drop
        #[arg(long, default_value = "median")]
        fill_strategy: FillStrategy,

        /// Share of the most recent rows held out for validation
        #[arg(long, default_value_t = 0.0)]
        validation_fraction: f64,
    },

    /// Show stored models, or the metadata of one
    Inspect {
        /// Service to inspect; lists every stored model when omitted
        service: Option<String>,
    },

    /// Score a batch message file against a stored model
    Score {
        /// JSON file holding one metric batch message
        batch: PathBuf,

        /// Score against this service's model instead of the batch's
        #[arg(long, short)]
        service: Option<String>,

        /// Decision threshold; lower scores are anomalous
        #[arg(long, default_value_t = anomaly_engine::scoring::DEFAULT_SCORE_THRESHOLD, allow_hyphen_values = true)]
        threshold: f64,

        /// Show every reading, not only anomalies
        #[arg(long)]
        all: bool,
    },

    /// Run a JSONL file of batch messages through the subscriber
    Replay {
        /// One batch message per line
        messages: PathBuf,

        /// Append anomalies to this JSONL file instead of only logging them
        #[arg(long)]
        writer_path: Option<PathBuf>,

        /// Decision threshold; lower scores are anomalous
        #[arg(long, default_value_t = anomaly_engine::scoring::DEFAULT_SCORE_THRESHOLD, allow_hyphen_values = true)]
        threshold: f64,

        /// Messages processed concurrently
        #[arg(long, default_value_t = anomaly_engine::subscriber::DEFAULT_MAX_WORKERS)]
        max_workers: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();

    // Execute command
    match cli.command {
        Commands::Train {
            service,
            input,
            input_format,
            days,
            seed,
            contamination,
            n_estimators,
            max_samples,
            random_state,
            fill_strategy,
            validation_fraction,
        } => {
            let args = train::TrainArgs {
                service,
                input,
                input_format,
                days,
                seed,
                contamination,
                n_estimators,
                max_samples,
                random_state,
                fill_strategy,
                validation_fraction,
            };
            train::train(&cli.model_dir, args, cli.format).await?;
        }
        Commands::Inspect { service } => match service {
            Some(service) => inspect::show_model(&cli.model_dir, &service, cli.format).await?,
            None => inspect::list_models(&cli.model_dir, cli.format).await?,
        },
        Commands::Score {
            batch,
            service,
            threshold,
            all,
        } => {
            score::score_file(&cli.model_dir, &batch, service, threshold, all, cli.format).await?;
        }
        Commands::Replay {
            messages,
            writer_path,
            threshold,
            max_workers,
        } => {
            replay::replay_file(
                &cli.model_dir,
                &messages,
                writer_path,
                threshold,
                max_workers,
                cli.format,
            )
            .await?;
        }
    }

    Ok(())
}
