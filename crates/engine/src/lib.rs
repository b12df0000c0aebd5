//! Anomaly engine library for per-service metric anomaly detection
//!
//! This crate provides the core functionality for:
//! - Feature engineering from metric history and online readings
//! - Isolation forest training, persistence and inference
//! - Severity classification and batch scoring
//! - A batch subscriber with ack/nack semantics and graceful shutdown
//! - Health checks and observability

pub mod cache;
pub mod error;
pub mod features;
pub mod health;
pub mod model;
pub mod models;
pub mod observability;
pub mod scoring;
pub mod sink;
pub mod store;
pub mod subscriber;

pub use cache::{CacheStats, ModelCache};
pub use error::{EngineError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use scoring::{Scorer, Severity};
