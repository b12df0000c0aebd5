//! Bounded-concurrency receive loop

use super::batch::{BatchSubscriber, Disposition};
use super::source::MessageSource;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

/// Default number of messages processed at once
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Counters for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
    /// Tasks that panicked; their messages were never settled
    pub failed: u64,
}

impl LoopStats {
    fn record(&mut self, joined: Result<Disposition, JoinError>) {
        match joined {
            Ok(Disposition::Ack) => self.acked += 1,
            Ok(Disposition::Nack) => self.nacked += 1,
            Err(e) => {
                self.failed += 1;
                error!(error = %e, "Batch task failed");
            }
        }
    }
}

/// Pulls messages from a source and processes each on its own task
///
/// At most `max_workers` messages are held at any time: a worker permit is
/// taken before a message is received and released once it is settled.
pub struct SubscriberLoop {
    subscriber: Arc<BatchSubscriber>,
    max_workers: usize,
}

impl SubscriberLoop {
    pub fn new(subscriber: Arc<BatchSubscriber>, max_workers: usize) -> Self {
        Self {
            subscriber,
            max_workers: max_workers.max(1),
        }
    }

    /// Run until the source closes or `shutdown` fires
    ///
    /// Waiting for a permit or a message is abandoned as soon as shutdown is
    /// signalled. Messages already received are always processed and
    /// settled before this returns.
    pub async fn run(
        &self,
        source: Arc<dyn MessageSource>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> LoopStats {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks: JoinSet<Disposition> = JoinSet::new();
        let mut stats = LoopStats::default();

        info!(max_workers = self.max_workers, "Subscriber loop started");

        loop {
            let permit = tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signalled, no longer receiving");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    stats.record(joined);
                    continue;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let message = tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signalled, no longer receiving");
                    break;
                }
                message = source.receive() => match message {
                    Some(message) => message,
                    None => {
                        info!("Message source closed");
                        break;
                    }
                },
            };

            stats.received += 1;
            debug!(delivery_id = message.delivery_id, bytes = message.data.len(), "Received message");

            let subscriber = Arc::clone(&self.subscriber);
            let source = Arc::clone(&source);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = subscriber.process(&message.data).await;
                match outcome.disposition {
                    Disposition::Ack => source.ack(message.delivery_id).await,
                    Disposition::Nack => source.nack(message.delivery_id).await,
                }
                outcome.disposition
            });
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight batches");
        }
        while let Some(joined) = tasks.join_next().await {
            stats.record(joined);
        }

        info!(
            received = stats.received,
            acked = stats.acked,
            nacked = stats.nacked,
            failed = stats.failed,
            "Subscriber loop stopped"
        );
        stats
    }
}
