//! Historical training data: pivoting, JSONL loading and synthetic history

use super::builder::MetricRow;
use crate::error::{EngineError, Result};
use crate::models::{MetricName, MetricReading};
use chrono::{DateTime, Duration, DurationRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Sampling interval of generated history
const SYNTHETIC_INTERVAL_MINUTES: i64 = 10;

/// Share of generated rows that carry an injected spike
const SYNTHETIC_SPIKE_RATE: f64 = 0.05;

/// (mean, std) of healthy noise per metric, in canonical order
const SYNTHETIC_NOISE: [(f64, f64); 5] = [
    (70.0, 5.0),
    (60.0, 8.0),
    (120.0, 15.0),
    (1000.0, 100.0),
    (0.5, 0.2),
];

/// Pivot long-form readings into one wide row per (timestamp, service)
///
/// Duplicate readings of the same metric are averaged. Rows come back sorted
/// by timestamp, then service. Readings with unknown metric names are skipped.
/// A canonical metric that never appears at all is filled with 0.0 so the
/// feature builder does not reject a fully empty column.
pub fn pivot_readings(readings: &[MetricReading]) -> Vec<MetricRow> {
    let mut grouped: BTreeMap<(DateTime<Utc>, String), [(f64, usize); 5]> = BTreeMap::new();
    let mut seen = [false; 5];
    let mut skipped = 0usize;

    for reading in readings {
        let Ok(metric) = reading.metric() else {
            skipped += 1;
            continue;
        };
        let slots = grouped
            .entry((reading.timestamp, reading.service_name.clone()))
            .or_insert([(0.0, 0); 5]);
        let slot = &mut slots[metric.index()];
        slot.0 += reading.value;
        slot.1 += 1;
        seen[metric.index()] = true;
    }

    if skipped > 0 {
        debug!(skipped, "Skipped readings with unknown metric names");
    }

    for metric in MetricName::ALL {
        if !seen[metric.index()] && !grouped.is_empty() {
            warn!(metric = %metric, "Metric absent from history, filling with 0.0");
        }
    }

    grouped
        .into_iter()
        .map(|((timestamp, service), slots)| {
            let mut row = MetricRow::new(timestamp, service);
            for metric in MetricName::ALL {
                let (sum, count) = slots[metric.index()];
                let value = if count > 0 {
                    Some(sum / count as f64)
                } else if !seen[metric.index()] {
                    Some(0.0)
                } else {
                    None
                };
                row.set(metric, value);
            }
            row
        })
        .collect()
}

fn read_jsonl<T, F>(path: &Path, mut keep: F) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned,
    F: FnMut(&T) -> bool,
{
    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: T = serde_json::from_str(&line).map_err(|e| {
            EngineError::InvalidInput(format!(
                "{}:{}: {}",
                path.display(),
                line_no + 1,
                e
            ))
        })?;
        if keep(&item) {
            items.push(item);
        }
    }
    Ok(items)
}

/// Load wide metric rows, optionally keeping a single service
pub fn load_rows_jsonl(path: &Path, service: Option<&str>) -> Result<Vec<MetricRow>> {
    let rows = read_jsonl(path, |r: &MetricRow| {
        service.map_or(true, |s| r.service_name == s)
    })?;
    info!(path = %path.display(), rows = rows.len(), "Loaded metric rows");
    Ok(rows)
}

/// Load long-form readings, optionally keeping a single service
pub fn load_readings_jsonl(path: &Path, service: Option<&str>) -> Result<Vec<MetricReading>> {
    let readings = read_jsonl(path, |r: &MetricReading| {
        service.map_or(true, |s| r.service_name == s)
    })?;
    info!(path = %path.display(), readings = readings.len(), "Loaded metric readings");
    Ok(readings)
}

/// Standard normal sample via Box-Muller
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Generate `days` of ten-minute history ending at the current hour
///
/// Values are normal noise around the healthy baseline with roughly 5% of
/// rows replaced by a spike. The same seed always yields the same values.
pub fn synthetic_history(service: &str, days: u32, seed: u64) -> Vec<MetricRow> {
    let end = Utc::now()
        .duration_trunc(Duration::hours(1))
        .unwrap_or_else(|_| Utc::now());
    synthetic_history_until(service, days, seed, end)
}

/// Same as [`synthetic_history`] with an explicit end timestamp
pub fn synthetic_history_until(
    service: &str,
    days: u32,
    seed: u64,
    end: DateTime<Utc>,
) -> Vec<MetricRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = (days as i64) * 24 * 60 / SYNTHETIC_INTERVAL_MINUTES;
    let start = end - Duration::minutes(SYNTHETIC_INTERVAL_MINUTES * n);

    let mut rows = Vec::with_capacity(n as usize);
    let mut spikes = 0usize;
    for i in 0..n {
        let timestamp = start + Duration::minutes(SYNTHETIC_INTERVAL_MINUTES * i);
        let mut row = MetricRow::new(timestamp, service);
        for metric in MetricName::ALL {
            let (mean, std) = SYNTHETIC_NOISE[metric.index()];
            let value = (mean + std * standard_normal(&mut rng)).max(0.0);
            row.set(metric, Some(value));
        }

        if rng.gen_bool(SYNTHETIC_SPIKE_RATE) {
            spikes += 1;
            match rng.gen_range(0..4) {
                0 => row.set(MetricName::CpuUsage, Some(rng.gen_range(90.0..100.0))),
                1 => row.set(MetricName::MemoryUsage, Some(rng.gen_range(85.0..95.0))),
                2 => row.set(MetricName::LatencyP95, Some(rng.gen_range(300.0..500.0))),
                _ => row.set(MetricName::ErrorRate, Some(rng.gen_range(5.0..15.0))),
            }
        }
        rows.push(row);
    }

    info!(service = %service, rows = rows.len(), spikes, "Generated synthetic history");
    rows
}
