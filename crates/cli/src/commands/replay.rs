//! Replay of recorded batch messages through the subscriber pipeline

use anomaly_engine::{
    cache::ModelCache,
    health::HealthRegistry,
    observability::StructuredLogger,
    scoring::Scorer,
    sink::{build_publisher, build_writer, PublisherKind, WriterKind},
    store::{open_store, StoreBackend},
    subscriber::{BatchSubscriber, ChannelSource, LoopStats, SubscriberLoop},
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::Tabled;
use tokio::sync::broadcast;
use tracing::warn;

use crate::output::{color_disposition, print_json, print_success, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Disposition")]
    disposition: String,
    #[tabled(rename = "Messages")]
    messages: u64,
}

#[derive(Serialize)]
struct ReplaySummary {
    messages: usize,
    #[serde(flatten)]
    stats: LoopStats,
    cached_models: usize,
}

fn read_messages(path: &Path) -> Result<Vec<Vec<u8>>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.as_bytes().to_vec())
        .collect())
}

/// Feed every message in `messages` through a full subscriber and report dispositions
///
/// Ctrl-C stops receiving; messages already taken are still settled.
pub async fn replay_file(
    model_dir: &Path,
    messages: &Path,
    writer_path: Option<PathBuf>,
    threshold: f64,
    max_workers: usize,
    format: OutputFormat,
) -> Result<()> {
    let lines = read_messages(messages)?;

    let store = open_store(StoreBackend::Local, model_dir)
        .with_context(|| format!("Failed to open model store at {}", model_dir.display()))?;
    let writer_kind = if writer_path.is_some() {
        WriterKind::File
    } else {
        WriterKind::Log
    };
    let writer = build_writer(writer_kind, writer_path.as_deref(), None)?;
    let publisher = build_publisher(PublisherKind::Log, None)?;

    let health = HealthRegistry::with_scorer_components().await;
    let subscriber = Arc::new(BatchSubscriber::new(
        Arc::new(ModelCache::new(store).with_health(health.clone())),
        Scorer::new(threshold),
        writer,
        publisher,
        health,
        StructuredLogger::new("sentry-cli"),
    ));

    let (source, tx) = ChannelSource::new(lines.len());
    for line in &lines {
        tx.send(line.clone())
            .await
            .context("Replay source closed unexpectedly")?;
    }
    drop(tx);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let interrupt_tx = shutdown_tx.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight messages");
            let _ = interrupt_tx.send(());
        }
    });

    let stats = SubscriberLoop::new(Arc::clone(&subscriber), max_workers)
        .run(source, shutdown_rx)
        .await;
    interrupt.abort();

    let summary = ReplaySummary {
        messages: lines.len(),
        stats,
        cached_models: subscriber.cache().len(),
    };

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            print_table(&[
                CountRow {
                    disposition: color_disposition("ack"),
                    messages: stats.acked,
                },
                CountRow {
                    disposition: color_disposition("nack"),
                    messages: stats.nacked,
                },
            ]);
            if stats.nacked > 0 || stats.failed > 0 {
                print_warning(&format!(
                    "{} of {} messages would be redelivered",
                    stats.nacked + stats.failed,
                    stats.received
                ));
            } else {
                print_success(&format!("Replayed {} messages", stats.received));
            }
        }
    }

    Ok(())
}
