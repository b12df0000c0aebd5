use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity bucket derived from a decision score, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Normal,
    ];

    /// Classify a decision score; lower scores are more severe
    ///
    /// | score               | severity |
    /// |---------------------|----------|
    /// | < -0.2              | critical |
    /// | -0.2 ..= -0.1       | high     |
    /// | (-0.1, 0.0)         | medium   |
    /// | [0.0, 0.1)          | low      |
    /// | >= 0.1              | normal   |
    ///
    /// NaN fails every comparison and lands in `Normal`.
    pub fn from_score(score: f64) -> Self {
        if score < -0.2 {
            Severity::Critical
        } else if score <= -0.1 {
            Severity::High
        } else if score < 0.0 {
            Severity::Medium
        } else if score < 0.1 {
            Severity::Low
        } else {
            Severity::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        assert_eq!(Severity::from_score(-0.25), Severity::Critical);
        assert_eq!(Severity::from_score(-0.2), Severity::High);
        assert_eq!(Severity::from_score(-0.15), Severity::High);
        assert_eq!(Severity::from_score(-0.1), Severity::High);
        assert_eq!(Severity::from_score(-0.05), Severity::Medium);
        assert_eq!(Severity::from_score(0.0), Severity::Low);
        assert_eq!(Severity::from_score(0.05), Severity::Low);
        assert_eq!(Severity::from_score(0.1), Severity::Normal);
        assert_eq!(Severity::from_score(0.3), Severity::Normal);
    }

    #[test]
    fn test_monotonic_in_score() {
        let mut previous = Severity::Critical;
        for i in -100..=100 {
            let current = Severity::from_score(i as f64 / 200.0);
            assert!(current <= previous, "severity rose at score {}", i as f64 / 200.0);
            previous = current;
        }
    }

    #[test]
    fn test_nan_is_normal() {
        assert_eq!(Severity::from_score(f64::NAN), Severity::Normal);
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        let parsed: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(parsed, Severity::Critical);
    }
}
