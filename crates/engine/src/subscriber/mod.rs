//! Batch subscriber for metric messages
//!
//! This module provides:
//! - Parsing of metric batch messages and push envelopes
//! - Per-batch processing with ack/nack decisions
//! - Message sources for push delivery and in-memory replay
//! - A bounded-concurrency loop with graceful shutdown

mod batch;
mod message;
mod runner;
mod source;


pub use batch::{BatchOutcome, BatchSubscriber, Disposition, OutcomeReason};
pub use message::{
    decode_push_envelope, parse_batch, parse_timestamp, BatchMetric, MetricBatchMessage,
    PushPayload,
};
pub use runner::{LoopStats, SubscriberLoop, DEFAULT_MAX_WORKERS};
pub use source::{ChannelSource, MessageSource, PushHandle, PushSource, ReceivedMessage};
