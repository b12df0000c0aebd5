//! Online scorer service: HTTP surface and configuration
//!
//! The binary in `main.rs` wires these to the anomaly engine.

pub mod api;
pub mod config;
