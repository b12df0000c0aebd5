//! Wire formats for metric batch messages

use crate::error::{EngineError, Result};
use crate::models::MetricReading;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct RawBatch {
    #[serde(default)]
    service_name: Option<String>,
    #[serde(default)]
    metrics: Vec<RawMetric>,
}

#[derive(Debug, Deserialize)]
struct RawMetric {
    timestamp: String,
    metric_name: String,
    value: Value,
    #[serde(default)]
    tags: BTreeMap<String, Value>,
}

/// Outgoing batch shape, used by tools that produce messages
#[derive(Debug, Clone, Serialize)]
pub struct MetricBatchMessage<'a> {
    pub service_name: &'a str,
    pub metrics: Vec<BatchMetric<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchMetric<'a> {
    pub timestamp: DateTime<Utc>,
    pub metric_name: &'a str,
    pub value: f64,
    pub tags: &'a BTreeMap<String, String>,
}

impl<'a> MetricBatchMessage<'a> {
    /// Message for readings that all belong to `service_name`
    pub fn new(service_name: &'a str, readings: &'a [MetricReading]) -> Self {
        Self {
            service_name,
            metrics: readings
                .iter()
                .map(|r| BatchMetric {
                    timestamp: r.timestamp,
                    metric_name: &r.metric_name,
                    value: r.value,
                    tags: &r.tags,
                })
                .collect(),
        }
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(EngineError::MalformedMessage(format!("invalid timestamp: {}", raw)))
}

fn parse_value(value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| EngineError::MalformedMessage(format!("non-numeric value: {}", value)))
}

fn tag_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Decode a metric batch message into readings
///
/// Every reading takes the batch's `service_name`. Any structural problem is
/// a [`EngineError::MalformedMessage`], which redelivery cannot fix.
pub fn parse_batch(data: &[u8]) -> Result<Vec<MetricReading>> {
    let raw: RawBatch = serde_json::from_slice(data)
        .map_err(|e| EngineError::MalformedMessage(e.to_string()))?;

    let service_name = raw
        .service_name
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            EngineError::MalformedMessage("message missing 'service_name' field".to_string())
        })?;

    raw.metrics
        .into_iter()
        .map(|m| {
            Ok(MetricReading {
                timestamp: parse_timestamp(&m.timestamp)?,
                service_name: service_name.clone(),
                metric_name: m.metric_name,
                value: parse_value(&m.value)?,
                tags: m
                    .tags
                    .into_iter()
                    .map(|(k, v)| (k, tag_to_string(v)))
                    .collect(),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
    #[serde(default)]
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: Option<String>,
}

/// Payload extracted from a push delivery envelope
#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    pub message_id: Option<String>,
    pub subscription: Option<String>,
    pub data: Vec<u8>,
}

/// Decode `{"message": {"data": <base64>, "messageId": ...}, "subscription": ...}`
pub fn decode_push_envelope(body: &[u8]) -> Result<PushPayload> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|e| EngineError::MalformedMessage(format!("invalid push envelope: {}", e)))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(envelope.message.data.as_bytes())
        .map_err(|e| EngineError::MalformedMessage(format!("invalid base64 data: {}", e)))?;
    Ok(PushPayload {
        message_id: envelope.message.message_id,
        subscription: envelope.subscription,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricName;
    use chrono::TimeZone;

    #[test]
    fn test_parse_valid_batch() {
        let data = br#"{
            "service_name": "frontend-api",
            "metrics": [
                {"timestamp": "2024-01-01T00:00:00Z", "metric_name": "cpu_usage", "value": 75.0, "tags": {"host": "a", "zone": 3}},
                {"timestamp": "2024-01-01T00:00:00", "metric_name": "memory_usage", "value": "61.5"}
            ]
        }"#;
        let readings = parse_batch(data).unwrap();
        assert_eq!(readings.len(), 2);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(readings[0].timestamp, t0);
        assert_eq!(readings[1].timestamp, t0);
        assert_eq!(readings[0].service_name, "frontend-api");
        assert_eq!(readings[0].tags["zone"], "3");
        assert_eq!(readings[1].value, 61.5);
        assert_eq!(readings[1].metric().unwrap(), MetricName::MemoryUsage);
        assert!(readings[1].tags.is_empty());
    }

    #[test]
    fn test_offset_timestamp_normalized_to_utc() {
        let ts = parse_timestamp("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_missing_metrics_is_empty() {
        assert!(parse_batch(br#"{"service_name": "api"}"#).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_batches() {
        let cases: &[&[u8]] = &[
            b"not json",
            br#"{"metrics": []}"#,
            br#"{"service_name": "", "metrics": []}"#,
            br#"{"service_name": "api", "metrics": [{"timestamp": "yesterday", "metric_name": "cpu_usage", "value": 1}]}"#,
            br#"{"service_name": "api", "metrics": [{"timestamp": "2024-01-01T00:00:00Z", "metric_name": "cpu_usage", "value": "high"}]}"#,
            br#"{"service_name": "api", "metrics": [{"timestamp": "2024-01-01T00:00:00Z", "value": 1}]}"#,
        ];
        for case in cases {
            let err = parse_batch(case).unwrap_err();
            assert!(
                matches!(err, EngineError::MalformedMessage(_)),
                "{}",
                String::from_utf8_lossy(case)
            );
            assert!(err.is_permanent());
        }
    }

    #[test]
    fn test_batch_message_round_trip() {
        let readings = vec![MetricReading::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            "api",
            MetricName::CpuUsage,
            88.0,
        )];
        let bytes = serde_json::to_vec(&MetricBatchMessage::new("api", &readings)).unwrap();
        assert_eq!(parse_batch(&bytes).unwrap(), readings);
    }

    #[test]
    fn test_decode_push_envelope() {
        let data = base64::engine::general_purpose::STANDARD.encode(br#"{"service_name":"api"}"#);
        let body = serde_json::json!({
            "message": {"data": data, "messageId": "42"},
            "subscription": "projects/p/subscriptions/metric-batches"
        });
        let payload = decode_push_envelope(body.to_string().as_bytes()).unwrap();
        assert_eq!(payload.message_id.as_deref(), Some("42"));
        assert_eq!(payload.data, br#"{"service_name":"api"}"#.to_vec());

        let bad = serde_json::json!({"message": {"data": "%%%"}});
        assert!(decode_push_envelope(bad.to_string().as_bytes()).is_err());
    }
}
