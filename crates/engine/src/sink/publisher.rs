use super::{http_client, parse_endpoint, AnomalyPublisher};
use crate::error::{EngineError, Result};
use crate::models::AnomalyResult;
use crate::scoring::Severity;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

fn severity_distribution(anomalies: &[AnomalyResult]) -> BTreeMap<Severity, usize> {
    let mut counts = BTreeMap::new();
    for anomaly in anomalies {
        *counts.entry(anomaly.severity).or_insert(0) += 1;
    }
    counts
}

fn format_distribution(counts: &BTreeMap<Severity, usize>) -> String {
    counts
        .iter()
        .rev()
        .map(|(severity, n)| format!("{}={}", severity, n))
        .collect::<Vec<_>>()
        .join(",")
}

/// Publisher that only logs events
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

#[async_trait]
impl AnomalyPublisher for LogPublisher {
    async fn publish(&self, anomalies: &[AnomalyResult]) -> Result<()> {
        let counts = severity_distribution(anomalies);
        info!(
            count = anomalies.len(),
            severities = %format_distribution(&counts),
            "Anomaly events published to log"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Posts every anomaly as its own JSON event to a webhook
///
/// Routing headers `x-service-name`, `x-severity` and `x-metric-name`
/// accompany each event. Every anomaly is attempted; the call fails if any
/// of them could not be delivered.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl WebhookPublisher {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: parse_endpoint(endpoint)?,
        })
    }

    async fn publish_one(&self, anomaly: &AnomalyResult) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-service-name", &anomaly.service_name)
            .header("x-severity", anomaly.severity.as_str())
            .header("x-metric-name", &anomaly.metric_name)
            .json(anomaly)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Publish(format!("webhook returned {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl AnomalyPublisher for WebhookPublisher {
    async fn publish(&self, anomalies: &[AnomalyResult]) -> Result<()> {
        if anomalies.is_empty() {
            debug!("No anomalies to publish");
            return Ok(());
        }

        let mut failed = 0usize;
        for anomaly in anomalies {
            if let Err(e) = self.publish_one(anomaly).await {
                failed += 1;
                warn!(
                    service = %anomaly.service_name,
                    metric = %anomaly.metric_name,
                    error = %e,
                    "Failed to publish anomaly event"
                );
            }
        }

        let counts = severity_distribution(anomalies);
        info!(
            published = anomalies.len() - failed,
            failed,
            severities = %format_distribution(&counts),
            "Published anomaly events"
        );

        if failed > 0 {
            error!(failed, total = anomalies.len(), "Some anomaly events were not published");
            return Err(EngineError::Publish(format!(
                "{} of {} anomaly events failed",
                failed,
                anomalies.len()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
