//! Stored model inspection commands

use anomaly_engine::store::{LocalModelStore, ModelStore};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{format_rate, print_json, print_table, print_warning, OutputFormat};

/// Row for the models table
#[derive(Tabled, Serialize)]
struct ModelRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Samples")]
    samples: String,
    #[tabled(rename = "Anomaly Rate")]
    anomaly_rate: String,
    #[tabled(rename = "Trained")]
    trained_at: String,
}

fn open(model_dir: &Path) -> Result<LocalModelStore> {
    LocalModelStore::new(model_dir)
        .with_context(|| format!("Failed to open model store at {}", model_dir.display()))
}

/// List every stored model
pub async fn list_models(model_dir: &Path, format: OutputFormat) -> Result<()> {
    let store = open(model_dir)?;
    let services = store.list_services().await?;

    let mut rows = Vec::with_capacity(services.len());
    for service in services {
        let version = store.version(&service).await?.unwrap_or_else(|| "-".to_string());
        let row = match store.load_metadata(&service).await? {
            Some(meta) => ModelRow {
                service,
                version,
                samples: meta.n_samples.to_string(),
                anomaly_rate: format_rate(meta.training_anomaly_rate),
                trained_at: meta.trained_at.format("%Y-%m-%d %H:%M").to_string(),
            },
            None => ModelRow {
                service,
                version,
                samples: "-".to_string(),
                anomaly_rate: "-".to_string(),
                trained_at: "-".to_string(),
            },
        };
        rows.push(row);
    }

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            print_table(&rows);
            Ok(())
        }
    }
}

/// Show the metadata of one stored model
pub async fn show_model(model_dir: &Path, service: &str, format: OutputFormat) -> Result<()> {
    let store = open(model_dir)?;
    if !store.exists(service).await? {
        anyhow::bail!("No model stored for service {}", service);
    }

    let Some(meta) = store.load_metadata(service).await? else {
        print_warning(&format!("Model for {} has no metadata", service));
        return Ok(());
    };
    let version = store.version(service).await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "service_name": service,
            "version": version,
            "metadata": meta,
        })),
        OutputFormat::Table => {
            println!("Service:         {}", service);
            println!("Version:         {}", version.as_deref().unwrap_or("-"));
            println!("Model type:      {}", meta.model_type);
            println!("Trained at:      {}", meta.trained_at.to_rfc3339());
            println!("Samples:         {}", meta.n_samples);
            println!("Features:        {}", meta.feature_names.join(", "));
            println!("Anomaly rate:    {}", format_rate(meta.training_anomaly_rate));
            println!("Hyperparameters:");
            for (name, value) in &meta.hyperparameters {
                println!("  {:<16} {}", name, value);
            }
            Ok(())
        }
    }
}
