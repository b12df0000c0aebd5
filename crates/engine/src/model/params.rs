//! Training hyperparameters

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_CONTAMINATION: f64 = 0.05;
pub const DEFAULT_N_ESTIMATORS: usize = 100;
pub const DEFAULT_RANDOM_STATE: u64 = 42;

/// Upper bound for the automatic subsample size
const AUTO_MAX_SAMPLES: usize = 256;

/// Number of rows drawn to grow each tree
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxSamples {
    /// `min(256, n_rows)`
    #[default]
    Auto,
    Count(usize),
    /// Share of the training rows, in (0, 1]
    Fraction(f64),
}

impl MaxSamples {
    /// Effective subsample size for `n_rows` training rows
    pub fn resolve(&self, n_rows: usize) -> Result<usize> {
        match *self {
            MaxSamples::Auto => Ok(n_rows.min(AUTO_MAX_SAMPLES)),
            MaxSamples::Count(0) => Err(EngineError::InvalidInput(
                "max_samples must be at least 1".to_string(),
            )),
            MaxSamples::Count(k) if k > n_rows => {
                warn!(
                    max_samples = k,
                    n_rows, "max_samples exceeds the number of rows, using all rows"
                );
                Ok(n_rows)
            }
            MaxSamples::Count(k) => Ok(k),
            MaxSamples::Fraction(f) if f > 0.0 && f <= 1.0 => {
                Ok(((f * n_rows as f64) as usize).max(1))
            }
            MaxSamples::Fraction(f) => Err(EngineError::InvalidInput(format!(
                "max_samples fraction must be in (0, 1], got {}",
                f
            ))),
        }
    }
}

impl fmt::Display for MaxSamples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxSamples::Auto => write!(f, "auto"),
            MaxSamples::Count(k) => write!(f, "{}", k),
            MaxSamples::Fraction(x) => write!(f, "{}", x),
        }
    }
}

impl FromStr for MaxSamples {
    type Err = EngineError;

    /// `auto`, an integer count, or a fraction such as `0.5`
    fn from_str(s: &str) -> Result<Self> {
        if s == "auto" {
            return Ok(MaxSamples::Auto);
        }
        if let Ok(k) = s.parse::<usize>() {
            return Ok(MaxSamples::Count(k));
        }
        s.parse::<f64>()
            .map(MaxSamples::Fraction)
            .map_err(|_| EngineError::InvalidInput(format!("invalid max_samples: {}", s)))
    }
}

/// Isolation forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: MaxSamples,
    pub random_state: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            contamination: DEFAULT_CONTAMINATION,
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_samples: MaxSamples::Auto,
            random_state: DEFAULT_RANDOM_STATE,
        }
    }
}

impl TrainingParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(EngineError::InvalidInput(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 {
            return Err(EngineError::InvalidInput(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Flat view used in model metadata
    pub fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
        let max_samples = match self.max_samples {
            MaxSamples::Auto => serde_json::Value::from("auto"),
            MaxSamples::Count(k) => serde_json::Value::from(k),
            MaxSamples::Fraction(f) => serde_json::Value::from(f),
        };
        BTreeMap::from([
            ("contamination".to_string(), serde_json::Value::from(self.contamination)),
            ("n_estimators".to_string(), serde_json::Value::from(self.n_estimators)),
            ("max_samples".to_string(), max_samples),
            ("random_state".to_string(), serde_json::Value::from(self.random_state)),
        ])
    }
}
