//! Processing of one metric batch end to end

use super::message::parse_batch;
use crate::cache::ModelCache;
use crate::health::{components, HealthRegistry};
use crate::models::AnomalyResult;
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::scoring::{filter_anomalies, Scorer};
use crate::sink::{AnomalyPublisher, AnomalyWriter};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What to tell the broker about a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Ack,
    /// Ask for redelivery
    Nack,
}

/// Why a batch ended the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    MalformedMessage,
    Empty,
    NoModel,
    ScoringFailed,
    NoAnomalies,
    WriteFailed,
    Published,
    PublishFailed,
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeReason::MalformedMessage => "malformed_message",
            OutcomeReason::Empty => "empty",
            OutcomeReason::NoModel => "no_model",
            OutcomeReason::ScoringFailed => "scoring_failed",
            OutcomeReason::NoAnomalies => "no_anomalies",
            OutcomeReason::WriteFailed => "write_failed",
            OutcomeReason::Published => "published",
            OutcomeReason::PublishFailed => "publish_failed",
        };
        f.write_str(s)
    }
}

/// Result of processing one message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub disposition: Disposition,
    pub reason: OutcomeReason,
    pub service_name: Option<String>,
    pub readings: usize,
    pub anomalies: Vec<AnomalyResult>,
}

impl BatchOutcome {
    fn ack(reason: OutcomeReason) -> Self {
        Self {
            disposition: Disposition::Ack,
            reason,
            service_name: None,
            readings: 0,
            anomalies: Vec::new(),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.disposition == Disposition::Ack
    }
}

/// Scores metric batches with per-service models and hands anomalies to the sinks
pub struct BatchSubscriber {
    cache: Arc<ModelCache>,
    scorer: Scorer,
    writer: Arc<dyn AnomalyWriter>,
    publisher: Arc<dyn AnomalyPublisher>,
    health: HealthRegistry,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl BatchSubscriber {
    pub fn new(
        cache: Arc<ModelCache>,
        scorer: Scorer,
        writer: Arc<dyn AnomalyWriter>,
        publisher: Arc<dyn AnomalyPublisher>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        info!(
            threshold = scorer.score_threshold(),
            writer = writer.name(),
            publisher = publisher.name(),
            "Initialized batch subscriber"
        );
        Self {
            cache,
            scorer,
            writer,
            publisher,
            health,
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Drop cached models so retrained ones are picked up
    pub fn reload_models(&self) -> usize {
        info!("Reloading all cached models");
        self.cache.clear()
    }

    /// Process one raw message and decide its disposition
    ///
    /// Only a failed write asks for redelivery. Everything else, including
    /// a failed publish after a successful write, is acknowledged.
    pub async fn process(&self, data: &[u8]) -> BatchOutcome {
        let start = Instant::now();
        self.metrics.inc_batches_received();

        let outcome = self.process_inner(data).await;

        match outcome.disposition {
            Disposition::Ack => self.metrics.inc_batches_acked(),
            Disposition::Nack => self.metrics.inc_batches_nacked(),
        }
        self.metrics
            .observe_batch_latency(start.elapsed().as_secs_f64());
        self.logger.log_batch(
            outcome.service_name.as_deref().unwrap_or("-"),
            outcome.readings,
            outcome.anomalies.len(),
            match outcome.disposition {
                Disposition::Ack => "ack",
                Disposition::Nack => "nack",
            },
            &outcome.reason.to_string(),
        );
        outcome
    }

    async fn process_inner(&self, data: &[u8]) -> BatchOutcome {
        let readings = match parse_batch(data) {
            Ok(readings) => readings,
            Err(e) => {
                self.metrics.inc_malformed_messages();
                error!(error = %e, "Invalid message format, acknowledging");
                return BatchOutcome::ack(OutcomeReason::MalformedMessage);
            }
        };

        if readings.is_empty() {
            warn!("No metrics in message");
            return BatchOutcome::ack(OutcomeReason::Empty);
        }

        let service = readings[0].service_name.clone();
        let mut outcome = BatchOutcome {
            service_name: Some(service.clone()),
            readings: readings.len(),
            ..BatchOutcome::ack(OutcomeReason::NoModel)
        };
        debug!(service = %service, readings = readings.len(), "Processing batch");

        let Some(model) = self.cache.get(&service).await else {
            warn!(service = %service, "Skipping batch: no model available");
            return outcome;
        };

        let results = match self.scorer.score_batch(&readings, &*model) {
            Ok(results) => results,
            Err(e) => {
                error!(service = %service, error = %e, "Scoring failed");
                outcome.reason = OutcomeReason::ScoringFailed;
                if !e.is_permanent() {
                    outcome.disposition = Disposition::Nack;
                }
                return outcome;
            }
        };

        let anomalies = filter_anomalies(results);
        if anomalies.is_empty() {
            info!(service = %service, "No anomalies detected in batch");
            outcome.reason = OutcomeReason::NoAnomalies;
            return outcome;
        }

        info!(service = %service, anomalies = anomalies.len(), "Detected anomalies");
        self.metrics.record_anomalies(&anomalies);
        for anomaly in &anomalies {
            self.logger.log_anomaly(anomaly);
        }

        if let Err(e) = self.writer.write(&anomalies).await {
            self.metrics.inc_write_failures();
            error!(service = %service, writer = self.writer.name(), error = %e, "Failed to write anomalies, requesting redelivery");
            self.health
                .record_failure(components::WRITER, e.to_string())
                .await;
            outcome.disposition = Disposition::Nack;
            outcome.reason = OutcomeReason::WriteFailed;
            outcome.anomalies = anomalies;
            return outcome;
        }
        self.health.record_success(components::WRITER).await;

        outcome.reason = match self.publisher.publish(&anomalies).await {
            Ok(()) => {
                self.health.record_success(components::PUBLISHER).await;
                OutcomeReason::Published
            }
            Err(e) => {
                self.metrics.inc_publish_failures();
                error!(service = %service, publisher = self.publisher.name(), error = %e, "Failed to publish anomaly events");
                self.health
                    .record_failure(components::PUBLISHER, e.to_string())
                    .await;
                OutcomeReason::PublishFailed
            }
        };
        outcome.anomalies = anomalies;
        outcome
    }
}
