//! Metric usage registry.
//!
//! # Data Flow
//! ```text
//! Producer (dashboard scan, rule-group push)
//!     → types.rs (ScanReport / UsageFact → Batch)
//!     → queue.rs (fire-and-forget enqueue)
//!     → engine.rs (single writer: replace-by-source / upsert)
//!     → store.rs (ArcSwap-published RegistryState)
//!     ← query.rs (read-only views for the HTTP layer)
//!
//! persistence.rs: periodic JSON snapshot of store.rs, reloaded at startup
//! ```
//!
//! # Design Decisions
//! - The store is owned by the process, not a global; handles are injected
//! - Merges are serialized through one task, reads never block on them
//! - Ingestion is at-most-once: buffered batches die with the process

pub mod engine;
pub mod persistence;
pub mod query;
pub mod queue;
pub mod stats;
pub mod store;
pub mod types;

use std::sync::Arc;

use crate::config::IngestConfig;

pub use engine::{apply_batch, ApplyReport, MergeEngine};
pub use query::{ListFilter, InvalidFilter, MetricRecord, MetricUsage, Page, QuerySurface, RegistryExport};
pub use queue::{EnqueueOutcome, IngestQueue, QueueError};
pub use stats::RegistryStats;
pub use store::{InvalidUsageEntry, RegistryState, RegistryStore};
pub use types::{Batch, InvalidMetric, Origin, ScanReport, SourceRef, UsageFact, UsageKind};

/// Handles over one registry instance.
#[derive(Debug, Clone)]
pub struct Registry {
    pub store: Arc<RegistryStore>,
    pub stats: Arc<RegistryStats>,
    pub queue: IngestQueue,
    pub query: QuerySurface,
}

impl Registry {
    /// Wire a registry around `state`. The returned engine must be run for
    /// enqueued batches to take effect.
    pub fn build(state: RegistryState, config: &IngestConfig) -> (Self, MergeEngine) {
        let store = Arc::new(RegistryStore::with_state(state));
        let stats = Arc::new(RegistryStats::new());
        let (queue, rx) = queue::channel(config, stats.clone());
        let engine = MergeEngine::new(store.clone(), rx, stats.clone(), config.max_batch);
        let query = QuerySurface::new(store.clone(), stats.clone());
        (
            Self {
                store,
                stats,
                queue,
                query,
            },
            engine,
        )
    }
}
