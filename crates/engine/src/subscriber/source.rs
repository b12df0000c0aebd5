//! Message sources feeding the subscriber loop

use super::batch::Disposition;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

/// A delivered message awaiting ack or nack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub delivery_id: u64,
    pub data: Vec<u8>,
}

/// Broker abstraction: pull messages, then settle each one exactly once
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Next message, `None` once the source is closed
    ///
    /// Must be cancel safe; the loop drops this future on shutdown.
    async fn receive(&self) -> Option<ReceivedMessage>;

    async fn ack(&self, delivery_id: u64);

    /// Request redelivery
    async fn nack(&self, delivery_id: u64);
}

/// In-memory source backed by a bounded channel
///
/// Records every settlement so callers can inspect what happened.
pub struct ChannelSource {
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    next_id: AtomicU64,
    settled: Mutex<Vec<(u64, Disposition)>>,
}

impl ChannelSource {
    /// Source plus the sender that feeds it; dropping every sender closes it
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let source = Arc::new(Self {
            rx: Mutex::new(rx),
            next_id: AtomicU64::new(0),
            settled: Mutex::new(Vec::new()),
        });
        (source, tx)
    }

    /// Settlements so far, in completion order
    pub async fn settled(&self) -> Vec<(u64, Disposition)> {
        self.settled.lock().await.clone()
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn receive(&self) -> Option<ReceivedMessage> {
        let data = self.rx.lock().await.recv().await?;
        Some(ReceivedMessage {
            delivery_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            data,
        })
    }

    async fn ack(&self, delivery_id: u64) {
        self.settled.lock().await.push((delivery_id, Disposition::Ack));
    }

    async fn nack(&self, delivery_id: u64) {
        self.settled.lock().await.push((delivery_id, Disposition::Nack));
    }
}

struct PushDelivery {
    data: Vec<u8>,
    responder: oneshot::Sender<Disposition>,
}

/// Source for HTTP push delivery
///
/// Each request handler hands its message over through a [`PushHandle`] and
/// waits for the disposition, which becomes the HTTP status the broker sees.
pub struct PushSource {
    rx: Mutex<mpsc::Receiver<PushDelivery>>,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Disposition>>,
}

/// Cloneable sending side of a [`PushSource`]
#[derive(Clone)]
pub struct PushHandle {
    tx: mpsc::Sender<PushDelivery>,
}

impl PushSource {
    /// `capacity` bounds messages queued ahead of the workers
    pub fn new(capacity: usize) -> (Arc<Self>, PushHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let source = Arc::new(Self {
            rx: Mutex::new(rx),
            next_id: AtomicU64::new(0),
            pending: DashMap::new(),
        });
        (source, PushHandle { tx })
    }

    /// Deliveries handed out but not settled yet
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn settle(&self, delivery_id: u64, disposition: Disposition) {
        match self.pending.remove(&delivery_id) {
            Some((_, responder)) => {
                if responder.send(disposition).is_err() {
                    // request handler gone, the broker will redeliver on its own
                    debug!(delivery_id, "Push requester went away before settlement");
                }
            }
            None => warn!(delivery_id, "Settled unknown push delivery"),
        }
    }
}

#[async_trait]
impl MessageSource for PushSource {
    async fn receive(&self) -> Option<ReceivedMessage> {
        let delivery = self.rx.lock().await.recv().await?;
        let delivery_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(delivery_id, delivery.responder);
        Some(ReceivedMessage {
            delivery_id,
            data: delivery.data,
        })
    }

    async fn ack(&self, delivery_id: u64) {
        self.settle(delivery_id, Disposition::Ack);
    }

    async fn nack(&self, delivery_id: u64) {
        self.settle(delivery_id, Disposition::Nack);
    }
}

impl PushHandle {
    /// Queue a message and wait for its disposition
    ///
    /// Fails when the subscriber loop is no longer running.
    pub async fn deliver(&self, data: Vec<u8>) -> Result<Disposition> {
        let (responder, response) = oneshot::channel();
        self.tx
            .send(PushDelivery { data, responder })
            .await
            .map_err(|_| EngineError::Unavailable("subscriber loop is not running".to_string()))?;
        response.await.map_err(|_| {
            EngineError::Unavailable("message dropped before settlement".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_closes_when_senders_drop() {
        let (source, tx) = ChannelSource::new(4);
        tx.send(b"one".to_vec()).await.unwrap();
        drop(tx);

        let first = source.receive().await.unwrap();
        assert_eq!(first.delivery_id, 0);
        source.ack(first.delivery_id).await;
        assert!(source.receive().await.is_none());
        assert_eq!(source.settled().await, vec![(0, Disposition::Ack)]);
    }

    #[tokio::test]
    async fn test_push_round_trip() {
        let (source, handle) = PushSource::new(4);
        let delivery = tokio::spawn({
            let handle = handle.clone();
            async move { handle.deliver(b"batch".to_vec()).await }
        });

        let message = source.receive().await.unwrap();
        assert_eq!(message.data, b"batch".to_vec());
        assert_eq!(source.in_flight(), 1);
        source.nack(message.delivery_id).await;

        assert_eq!(delivery.await.unwrap().unwrap(), Disposition::Nack);
        assert_eq!(source.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_push_fails_without_loop() {
        let (source, handle) = PushSource::new(1);
        drop(source);
        assert!(handle.deliver(b"x".to_vec()).await.is_err());
    }
}
