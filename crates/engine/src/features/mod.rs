//! Feature engineering for anomaly detection
//!
//! - [`builder`]: wide metric tables to dense training matrices
//! - [`reconstruct`]: full feature vectors for single online readings
//! - [`history`]: training data loading and generation

pub mod builder;
pub mod history;
pub mod reconstruct;
pub(crate) mod stats;

pub use builder::{
    add_time_features, build_feature_matrix, normalize_features, FillStrategy, MetricRow,
    MetricTable,
};
pub use history::{
    load_readings_jsonl, load_rows_jsonl, pivot_readings, synthetic_history,
    synthetic_history_until,
};
pub use reconstruct::{reconstruct_features, DEFAULT_FEATURES};
