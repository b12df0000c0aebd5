//! Observability infrastructure for the anomaly engine
//!
//! Provides:
//! - Prometheus metrics (batch dispositions, scoring volume, anomalies by severity, sink failures)
//! - Structured JSON logging with tracing

use crate::models::AnomalyResult;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for batch processing latency (in seconds)
const BATCH_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    batches_received: IntCounter,
    batches_acked: IntCounter,
    batches_nacked: IntCounter,
    malformed_messages: IntCounter,
    readings_scored: IntCounter,
    scoring_errors: IntCounter,
    anomalies_detected: IntCounterVec,
    write_failures: IntCounter,
    publish_failures: IntCounter,
    batch_latency_seconds: Histogram,
    cached_models: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            batches_received: register_int_counter!(
                "anomaly_engine_batches_received_total",
                "Metric batches received from the subscription"
            )
            .expect("Failed to register batches_received"),

            batches_acked: register_int_counter!(
                "anomaly_engine_batches_acked_total",
                "Metric batches acknowledged"
            )
            .expect("Failed to register batches_acked"),

            batches_nacked: register_int_counter!(
                "anomaly_engine_batches_nacked_total",
                "Metric batches negatively acknowledged for redelivery"
            )
            .expect("Failed to register batches_nacked"),

            malformed_messages: register_int_counter!(
                "anomaly_engine_malformed_messages_total",
                "Messages dropped because they could not be parsed"
            )
            .expect("Failed to register malformed_messages"),

            readings_scored: register_int_counter!(
                "anomaly_engine_readings_scored_total",
                "Metric readings scored against a model"
            )
            .expect("Failed to register readings_scored"),

            scoring_errors: register_int_counter!(
                "anomaly_engine_scoring_errors_total",
                "Metric readings skipped because scoring failed"
            )
            .expect("Failed to register scoring_errors"),

            anomalies_detected: register_int_counter_vec!(
                "anomaly_engine_anomalies_detected_total",
                "Anomalies detected, by severity",
                &["severity"]
            )
            .expect("Failed to register anomalies_detected"),

            write_failures: register_int_counter!(
                "anomaly_engine_write_failures_total",
                "Failed attempts to persist anomalies"
            )
            .expect("Failed to register write_failures"),

            publish_failures: register_int_counter!(
                "anomaly_engine_publish_failures_total",
                "Failed attempts to publish anomaly events"
            )
            .expect("Failed to register publish_failures"),

            batch_latency_seconds: register_histogram!(
                "anomaly_engine_batch_latency_seconds",
                "Time spent processing one metric batch",
                BATCH_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register batch_latency_seconds"),

            cached_models: register_int_gauge!(
                "anomaly_engine_cached_models",
                "Number of service models currently cached"
            )
            .expect("Failed to register cached_models"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying collectors.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn inc_batches_received(&self) {
        self.inner().batches_received.inc();
    }

    pub fn inc_batches_acked(&self) {
        self.inner().batches_acked.inc();
    }

    pub fn inc_batches_nacked(&self) {
        self.inner().batches_nacked.inc();
    }

    pub fn inc_malformed_messages(&self) {
        self.inner().malformed_messages.inc();
    }

    pub fn add_readings_scored(&self, count: u64) {
        self.inner().readings_scored.inc_by(count);
    }

    pub fn inc_scoring_errors(&self) {
        self.inner().scoring_errors.inc();
    }

    /// Count each anomaly under its severity label
    pub fn record_anomalies(&self, anomalies: &[AnomalyResult]) {
        for anomaly in anomalies {
            self.inner()
                .anomalies_detected
                .with_label_values(&[anomaly.severity.as_str()])
                .inc();
        }
    }

    pub fn inc_write_failures(&self) {
        self.inner().write_failures.inc();
    }

    pub fn inc_publish_failures(&self) {
        self.inner().publish_failures.inc();
    }

    pub fn observe_batch_latency(&self, duration_secs: f64) {
        self.inner().batch_latency_seconds.observe(duration_secs);
    }

    pub fn set_cached_models(&self, count: i64) {
        self.inner().cached_models.set(count);
    }
}

/// Structured logger for engine events
///
/// Fixed-shape events with an `event` field so log pipelines can filter on
/// them.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a detected anomaly; critical ones at warn level
    pub fn log_anomaly(&self, anomaly: &AnomalyResult) {
        if anomaly.severity == crate::scoring::Severity::Critical {
            warn!(
                event = "anomaly_detected",
                node = %self.node_name,
                service = %anomaly.service_name,
                metric = %anomaly.metric_name,
                value = anomaly.value,
                score = anomaly.anomaly_score,
                severity = %anomaly.severity,
                "Critical anomaly detected"
            );
        } else {
            info!(
                event = "anomaly_detected",
                node = %self.node_name,
                service = %anomaly.service_name,
                metric = %anomaly.metric_name,
                value = anomaly.value,
                score = anomaly.anomaly_score,
                severity = %anomaly.severity,
                "Anomaly detected"
            );
        }
    }

    /// Log the outcome of one batch
    pub fn log_batch(&self, service: &str, readings: usize, anomalies: usize, disposition: &str, reason: &str) {
        info!(
            event = "batch_processed",
            node = %self.node_name,
            service = %service,
            readings,
            anomalies,
            disposition = %disposition,
            reason = %reason,
            "Processed metric batch"
        );
    }

    pub fn log_model_trained(&self, service: &str, n_samples: usize, anomaly_rate: f64, location: &str) {
        info!(
            event = "model_trained",
            node = %self.node_name,
            service = %service,
            n_samples,
            training_anomaly_rate = anomaly_rate,
            location = %location,
            "Trained and saved model"
        );
    }

    pub fn log_startup(&self, version: &str, model_dir: &str) {
        info!(
            event = "scorer_started",
            node = %self.node_name,
            version = %version,
            model_dir = %model_dir,
            "Online scorer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scorer_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Online scorer shutting down"
        );
    }
}
