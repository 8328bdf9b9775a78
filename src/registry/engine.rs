//! Merge engine: the single writer of the registry.
//!
//! # Responsibilities
//! - Drain the ingestion queue
//! - Fold batches into a copy of the current state (replace-by-source or upsert)
//! - Publish the result atomically and acknowledge flush markers
//!
//! # Design Decisions
//! - One task owns the receiver, so merges are serialized without locks
//! - Up to `max_batch` queued batches are folded per published state
//! - Malformed facts are dropped and counted; producers never hear about them

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::registry::queue::{Message, QueueReceiver};
use crate::registry::stats::RegistryStats;
use crate::registry::store::{RegistryState, RegistryStore};
use crate::registry::types::{Batch, RejectReason, SourceRef, UsageFact, UsageKind};

/// Outcome of applying one or more batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: u64,
    pub rejected: Vec<RejectReason>,
}

impl ApplyReport {
    fn reject(&mut self, reason: RejectReason) {
        self.rejected.push(reason);
    }

    fn absorb(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.rejected.extend(other.rejected);
    }
}

/// Apply one batch to `state`.
///
/// `Batch::Replace` treats its facts as the complete current footprint of the
/// source: metrics and invalid expressions it no longer reports are retracted,
/// and metric entries left without sources are deleted. `Batch::Upsert` only
/// adds or overwrites.
pub fn apply_batch(state: &mut RegistryState, batch: Batch, now: u64) -> ApplyReport {
    match batch {
        Batch::Replace { source, facts } => replace_source(state, &source, facts, now),
        Batch::Upsert { facts } => upsert(state, facts, now),
    }
}

fn replace_source(state: &mut RegistryState, source: &SourceRef, facts: Vec<UsageFact>, now: u64) -> ApplyReport {
    let mut report = ApplyReport::default();

    if source.id.trim().is_empty() {
        for _ in 0..facts.len().max(1) {
            report.reject(RejectReason::EmptySource);
        }
        return report;
    }

    let mut metrics = BTreeSet::new();
    let mut invalid = BTreeMap::new();
    for fact in facts {
        if &fact.source != source {
            report.reject(RejectReason::ForeignSource);
            continue;
        }
        if let Err(reason) = fact.validate() {
            report.reject(reason);
            continue;
        }
        match fact.kind {
            UsageKind::Valid => {
                metrics.insert(fact.metric);
            }
            UsageKind::Invalid => {
                invalid.insert(fact.metric, fact.detail.unwrap_or_default());
            }
        }
        report.applied += 1;
    }

    let previous = state.take_footprint(source);
    for stale in previous.metrics.difference(&metrics) {
        state.remove_usage(stale, source);
    }
    for stale in previous.invalid.iter().filter(|e| !invalid.contains_key(*e)) {
        state.remove_invalid(stale, source);
    }

    // Re-adding rebuilds the source footprint from scratch.
    for metric in &metrics {
        state.add_usage(metric, source, now);
    }
    for (expression, detail) in invalid {
        state.upsert_invalid(&expression, source, detail, now);
    }

    report
}

fn upsert(state: &mut RegistryState, facts: Vec<UsageFact>, now: u64) -> ApplyReport {
    let mut report = ApplyReport::default();
    for fact in facts {
        if let Err(reason) = fact.validate() {
            report.reject(reason);
            continue;
        }
        match fact.kind {
            UsageKind::Valid => state.add_usage(&fact.metric, &fact.source, now),
            UsageKind::Invalid => {
                state.upsert_invalid(&fact.metric, &fact.source, fact.detail.unwrap_or_default(), now)
            }
        }
        report.applied += 1;
    }
    report
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Dedicated task that owns the queue receiver.
pub struct MergeEngine {
    store: Arc<RegistryStore>,
    rx: QueueReceiver,
    stats: Arc<RegistryStats>,
    max_batch: usize,
}

impl MergeEngine {
    pub fn new(store: Arc<RegistryStore>, rx: QueueReceiver, stats: Arc<RegistryStats>, max_batch: usize) -> Self {
        Self {
            store,
            rx,
            stats,
            max_batch: max_batch.max(1),
        }
    }

    /// Run until shutdown is signalled or every producer handle is dropped.
    ///
    /// On shutdown, batches already buffered are merged before returning.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(max_batch = self.max_batch, "Merge engine starting");

        loop {
            tokio::select! {
                message = self.rx.recv() => {
                    match message {
                        Some(message) => {
                            let mut pending = vec![message];
                            self.collect(&mut pending);
                            self.merge(pending);
                        }
                        None => {
                            tracing::info!("All producers gone, merge engine exiting");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    let drained = self.drain_pending();
                    tracing::info!(drained, "Merge engine received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Merge everything currently buffered. Returns the number of batches merged.
    pub fn drain_pending(&mut self) -> usize {
        let mut merged = 0;
        loop {
            let mut pending = Vec::new();
            self.collect(&mut pending);
            if pending.is_empty() {
                return merged;
            }
            merged += self.merge(pending);
        }
    }

    fn collect(&mut self, pending: &mut Vec<Message>) {
        while pending.len() < self.max_batch {
            match self.rx.try_recv() {
                Some(message) => pending.push(message),
                None => break,
            }
        }
    }

    fn merge(&self, messages: Vec<Message>) -> usize {
        let mut batches = Vec::with_capacity(messages.len());
        let mut acks = Vec::new();
        for message in messages {
            match message {
                Message::Batch(batch) => batches.push(batch),
                Message::Flush(ack) => acks.push(ack),
            }
        }

        let merged = batches.len();
        if merged > 0 {
            let start = Instant::now();
            let now = unix_now();
            let mut next = (*self.store.snapshot()).clone();
            let mut report = ApplyReport::default();
            for batch in batches {
                report.absorb(apply_batch(&mut next, batch, now));
            }
            next.generation += 1;

            let (generation, metric_count, invalid_count, source_count) = (
                next.generation(),
                next.metric_count(),
                next.invalid_count(),
                next.source_count(),
            );
            self.store.publish(next);

            self.stats
                .record_merged(merged as u64, report.applied, report.rejected.len() as u64);
            for reason in &report.rejected {
                metrics::record_fact_rejected(reason.as_str());
            }
            metrics::record_merge(merged, report.applied, start);
            metrics::record_registry_size(metric_count, invalid_count, source_count);
            metrics::record_queue_depth(self.stats.pending());

            if !report.rejected.is_empty() {
                tracing::debug!(
                    rejected = report.rejected.len(),
                    "Dropped malformed usage facts"
                );
            }
            tracing::debug!(
                generation,
                batches = merged,
                applied = report.applied,
                metrics = metric_count,
                elapsed = ?start.elapsed(),
                "Merged usage batches"
            );
        }

        // Acknowledge only after the state above is visible to readers.
        for ack in acks {
            let _ = ack.send(());
        }
        merged
    }
}
