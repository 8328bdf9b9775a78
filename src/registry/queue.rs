//! Ingestion queue between producers and the merge engine.
//!
//! # Responsibilities
//! - Accept batches from any number of producers without waiting on merges
//! - Enforce the configured capacity and overflow policy
//! - Carry flush markers so callers can wait for their batches to be merged
//!
//! # Design Decisions
//! - Unbounded `mpsc` unless `ingest.capacity` is set
//! - Bounded + `block`: producers await free space (backpressure)
//! - Bounded + `drop_newest`: the incoming batch is refused and counted
//! - At-most-once: batches still buffered when the process dies are lost

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::{IngestConfig, OverflowPolicy};
use crate::observability::metrics;
use crate::registry::stats::RegistryStats;
use crate::registry::types::{Batch, ScanReport, UsageFact};

/// Errors returned to producers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The merge engine has stopped; nothing will be applied anymore.
    #[error("ingestion queue is closed")]
    Closed,
}

/// Whether a batch made it into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Refused by the `drop_newest` overflow policy.
    Dropped,
}

#[derive(Debug)]
pub(crate) enum Message {
    Batch(Batch),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
enum Sender {
    Unbounded(mpsc::UnboundedSender<Message>),
    Bounded {
        tx: mpsc::Sender<Message>,
        policy: OverflowPolicy,
    },
}

#[derive(Debug)]
enum ReceiverKind {
    Unbounded(mpsc::UnboundedReceiver<Message>),
    Bounded(mpsc::Receiver<Message>),
}

/// Consuming end, owned by the merge engine.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: ReceiverKind,
}

impl QueueReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Message> {
        match &mut self.rx {
            ReceiverKind::Unbounded(rx) => rx.recv().await,
            ReceiverKind::Bounded(rx) => rx.recv().await,
        }
    }

    /// Next buffered message, or `None` if nothing is ready.
    pub(crate) fn try_recv(&mut self) -> Option<Message> {
        match &mut self.rx {
            ReceiverKind::Unbounded(rx) => rx.try_recv().ok(),
            ReceiverKind::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Producer handle. Cheap to clone; every HTTP handler and scanner holds one.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: Sender,
    stats: Arc<RegistryStats>,
}

/// Create a queue pair from configuration.
pub fn channel(config: &IngestConfig, stats: Arc<RegistryStats>) -> (IngestQueue, QueueReceiver) {
    let (tx, rx) = match config.capacity {
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Sender::Unbounded(tx), ReceiverKind::Unbounded(rx))
        }
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (
                Sender::Bounded {
                    tx,
                    policy: config.overflow,
                },
                ReceiverKind::Bounded(rx),
            )
        }
    };
    (IngestQueue { tx, stats }, QueueReceiver { rx })
}

impl IngestQueue {
    /// Hand a batch to the merge engine.
    ///
    /// Success means the batch was buffered, not that it was applied.
    pub async fn enqueue(&self, batch: Batch) -> Result<EnqueueOutcome, QueueError> {
        let mode = batch.mode();
        let facts = batch.len();

        self.stats.begin_enqueue();
        let sent = match &self.tx {
            Sender::Unbounded(tx) => tx.send(Message::Batch(batch)).map_err(|_| QueueError::Closed),
            Sender::Bounded {
                tx,
                policy: OverflowPolicy::Block,
            } => tx
                .send(Message::Batch(batch))
                .await
                .map_err(|_| QueueError::Closed),
            Sender::Bounded {
                tx,
                policy: OverflowPolicy::DropNewest,
            } => match tx.try_send(Message::Batch(batch)) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.abort_enqueue(true);
                    metrics::record_batch_dropped(mode);
                    tracing::warn!(mode, facts, "Ingestion queue full, dropping batch");
                    return Ok(EnqueueOutcome::Dropped);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
            },
        };

        match sent {
            Ok(()) => {
                self.stats.commit_enqueue();
                metrics::record_batch_enqueued(mode, facts);
                metrics::record_queue_depth(self.stats.pending());
                Ok(EnqueueOutcome::Accepted)
            }
            Err(e) => {
                self.stats.abort_enqueue(false);
                Err(e)
            }
        }
    }

    /// Full-replace ingestion of one scan.
    pub async fn enqueue_scan(&self, report: ScanReport) -> Result<EnqueueOutcome, QueueError> {
        self.enqueue(report.into_batch()).await
    }

    /// Incremental upsert of loose facts.
    pub async fn enqueue_facts(&self, facts: Vec<UsageFact>) -> Result<EnqueueOutcome, QueueError> {
        self.enqueue(Batch::Upsert { facts }).await
    }

    /// Wait until every batch enqueued before this call has been merged.
    pub async fn flush(&self) -> Result<(), QueueError> {
        let (ack, done) = oneshot::channel();
        match &self.tx {
            Sender::Unbounded(tx) => tx.send(Message::Flush(ack)).map_err(|_| QueueError::Closed)?,
            Sender::Bounded { tx, .. } => tx
                .send(Message::Flush(ack))
                .await
                .map_err(|_| QueueError::Closed)?,
        }
        done.await.map_err(|_| QueueError::Closed)
    }

    /// Batches accepted but not merged yet.
    pub fn depth(&self) -> u64 {
        self.stats.pending()
    }
}
