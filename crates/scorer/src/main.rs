//! Online scorer - per-service metric anomaly detection service
//!
//! Receives metric batches by HTTP push, scores them against the model
//! trained for their service and hands anomalies to the configured sinks.

use anomaly_engine::{
    cache::ModelCache,
    health::{components, HealthRegistry},
    observability::{EngineMetrics, StructuredLogger},
    scoring::Scorer,
    sink::{build_publisher, build_writer},
    store::open_store,
    subscriber::{BatchSubscriber, PushSource, SubscriberLoop},
};
use anyhow::{Context, Result};
use online_scorer::{api, config::ScorerConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SCORER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting online-scorer");

    let config = ScorerConfig::load(None)?;
    info!(
        node_name = %config.node_name,
        model_dir = %config.model_dir.display(),
        writer = %config.writer,
        publisher = %config.publisher,
        max_workers = config.max_workers,
        "Scorer configured"
    );

    let health_registry = HealthRegistry::with_scorer_components().await;
    // Register collectors before the first scrape
    let _metrics = EngineMetrics::new();

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(SCORER_VERSION, &config.model_dir.display().to_string());

    let store = open_store(config.store_backend()?, &config.model_dir)
        .context("Failed to open model store")?;
    let writer = build_writer(
        config.writer_kind()?,
        config.writer_path.as_deref(),
        config.warehouse_url.as_deref(),
    )
    .context("Failed to create anomaly writer")?;
    let publisher = build_publisher(config.publisher_kind()?, config.webhook_url.as_deref())
        .context("Failed to create anomaly publisher")?;

    let subscriber = Arc::new(BatchSubscriber::new(
        Arc::new(ModelCache::new(store).with_health(health_registry.clone())),
        Scorer::new(config.score_threshold),
        writer,
        publisher,
        health_registry.clone(),
        logger.clone(),
    ));

    let (source, push_handle) = PushSource::new(config.queue_capacity);
    let (loop_shutdown_tx, loop_shutdown_rx) = broadcast::channel(1);
    let subscriber_loop = SubscriberLoop::new(Arc::clone(&subscriber), config.max_workers);
    let loop_handle = tokio::spawn(async move { subscriber_loop.run(source, loop_shutdown_rx).await });

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::clone(&subscriber),
        push_handle,
        config.delivery_timeout(),
    ));

    // Mark scorer as ready after initialization
    health_registry.set_ready(true).await;

    // Stop accepting pushes first; in-flight deliveries still reach the loop
    let served = api::serve(config.api_port, app_state, shutdown_signal(logger.clone())).await;
    if let Err(e) = &served {
        error!(error = %e, "API server failed");
        health_registry
            .set_unhealthy(components::SUBSCRIBER, e.to_string())
            .await;
    }
    health_registry.set_ready(false).await;

    let _ = loop_shutdown_tx.send(());
    match loop_handle.await {
        Ok(stats) => info!(
            received = stats.received,
            acked = stats.acked,
            nacked = stats.nacked,
            "Subscriber loop drained"
        ),
        Err(e) => error!(error = %e, "Subscriber loop task failed"),
    }

    info!("Shutdown complete");
    served
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal(logger: StructuredLogger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => logger.log_shutdown("SIGINT received"),
        _ = terminate => logger.log_shutdown("SIGTERM received"),
    }
}
