//! Ingestion counters shared by the queue, the merge engine and the query surface.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct RegistryStats {
    batches_enqueued: AtomicU64,
    batches_dropped: AtomicU64,
    batches_merged: AtomicU64,
    facts_applied: AtomicU64,
    facts_rejected: AtomicU64,
    pending: AtomicU64,
}

/// Point-in-time copy of [`RegistryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub batches_enqueued: u64,
    pub batches_dropped: u64,
    pub batches_merged: u64,
    pub facts_applied: u64,
    pub facts_rejected: u64,
    /// Batches accepted into the queue but not merged yet.
    pub pending: u64,
}

impl RegistryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a batch before it is handed to the channel, so the merge
    /// engine can never see it before it is counted.
    pub(crate) fn begin_enqueue(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit_enqueue(&self) {
        self.batches_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn abort_enqueue(&self, dropped: bool) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        if dropped {
            self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_merged(&self, batches: u64, applied: u64, rejected: u64) {
        self.pending.fetch_sub(batches, Ordering::Relaxed);
        self.batches_merged.fetch_add(batches, Ordering::Relaxed);
        self.facts_applied.fetch_add(applied, Ordering::Relaxed);
        self.facts_rejected.fetch_add(rejected, Ordering::Relaxed);
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_enqueued: self.batches_enqueued.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            batches_merged: self.batches_merged.load(Ordering::Relaxed),
            facts_applied: self.facts_applied.load(Ordering::Relaxed),
            facts_rejected: self.facts_rejected.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}
