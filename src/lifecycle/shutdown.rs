//! Broadcast shutdown coordinator.
//!
//! The service runs two of these. The process-wide one is fired by the signal
//! handler and stops the HTTP server; once the server has finished its
//! in-flight requests, `Services::stop` fires its own to let the merge engine
//! drain the queue and the flusher write the last snapshot.

use tokio::sync::broadcast;

/// Fan-out stop signal for long-running tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver for one task. Subscribe before the task starts so a trigger
    /// sent in between is not missed.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let listeners = self.tx.send(()).unwrap_or(0);
        tracing::debug!(listeners, "Shutdown triggered");
    }

    /// Tasks still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
