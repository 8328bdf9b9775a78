//! Shared registry state and its publication.
//!
//! # Responsibilities
//! - Hold metric → sources and the invalid-usage table
//! - Remember what each source last reported (for replace-by-source)
//! - Publish fully-merged states to readers atomically
//!
//! # Design Decisions
//! - Copy-on-write: the merge engine clones the current state, mutates the
//!   clone and swaps it in through `ArcSwap`; readers never take a lock
//! - Entries and footprints sit behind `Arc` and are only copied when a merge
//!   touches them, so a clone costs one refcount bump per key instead of a deep
//!   copy of every source set
//! - Ordered maps so listings and exports are deterministic

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::registry::types::SourceRef;

/// Sources currently using one metric, with the last time each reported it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricEntry {
    pub sources: BTreeMap<SourceRef, u64>,
}

impl MetricEntry {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// A broken expression as reported by one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidUsageEntry {
    pub expression: String,
    pub source: SourceRef,
    pub detail: String,
    pub last_seen: u64,
}

/// What a source reported on its last merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFootprint {
    pub metrics: BTreeSet<String>,
    pub invalid: BTreeSet<String>,
}

impl SourceFootprint {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.invalid.is_empty()
    }
}

pub type InvalidKey = (String, SourceRef);

/// One consistent view of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    pub(crate) metrics: BTreeMap<String, Arc<MetricEntry>>,
    pub(crate) invalid: BTreeMap<InvalidKey, InvalidUsageEntry>,
    pub(crate) sources: BTreeMap<SourceRef, Arc<SourceFootprint>>,
    pub(crate) generation: u64,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources using `metric`; empty if the metric is unknown.
    pub fn get(&self, metric: &str) -> Option<&MetricEntry> {
        self.metrics.get(metric).map(Arc::as_ref)
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&String, &MetricEntry)> {
        self.metrics.iter().map(|(name, entry)| (name, entry.as_ref()))
    }

    pub fn invalid(&self) -> impl Iterator<Item = &InvalidUsageEntry> {
        self.invalid.values()
    }

    pub fn footprint(&self, source: &SourceRef) -> Option<&SourceFootprint> {
        self.sources.get(source).map(Arc::as_ref)
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Number of merges published so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // --- Mutation (merge engine only) ---

    pub(crate) fn add_usage(&mut self, metric: &str, source: &SourceRef, now: u64) {
        Arc::make_mut(self.metrics.entry(metric.to_string()).or_default())
            .sources
            .insert(source.clone(), now);
        Arc::make_mut(self.sources.entry(source.clone()).or_default())
            .metrics
            .insert(metric.to_string());
    }

    /// Retract `source` from `metric`, deleting the entry when no source is left.
    pub(crate) fn remove_usage(&mut self, metric: &str, source: &SourceRef) {
        if let Some(entry) = self.metrics.get_mut(metric) {
            if !entry.sources.contains_key(source) {
                return;
            }
            Arc::make_mut(entry).sources.remove(source);
            if entry.is_empty() {
                self.metrics.remove(metric);
            }
        }
    }

    pub(crate) fn upsert_invalid(&mut self, expression: &str, source: &SourceRef, detail: String, now: u64) {
        let key = (expression.to_string(), source.clone());
        self.invalid.insert(
            key,
            InvalidUsageEntry {
                expression: expression.to_string(),
                source: source.clone(),
                detail,
                last_seen: now,
            },
        );
        Arc::make_mut(self.sources.entry(source.clone()).or_default())
            .invalid
            .insert(expression.to_string());
    }

    pub(crate) fn remove_invalid(&mut self, expression: &str, source: &SourceRef) {
        self.invalid.remove(&(expression.to_string(), source.clone()));
    }

    pub(crate) fn take_footprint(&mut self, source: &SourceRef) -> SourceFootprint {
        self.sources
            .remove(source)
            .map(|footprint| Arc::try_unwrap(footprint).unwrap_or_else(|shared| (*shared).clone()))
            .unwrap_or_default()
    }

    /// Recompute the per-source index from the metric and invalid tables.
    pub(crate) fn rebuild_index(&mut self) {
        let mut sources: BTreeMap<SourceRef, SourceFootprint> = BTreeMap::new();
        for (name, entry) in &self.metrics {
            for source in entry.sources.keys() {
                sources.entry(source.clone()).or_default().metrics.insert(name.clone());
            }
        }
        for (expression, source) in self.invalid.keys() {
            sources.entry(source.clone()).or_default().invalid.insert(expression.clone());
        }
        self.sources = sources.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();
    }
}

/// Owner of the published registry state.
///
/// Constructed once at startup and shared by handle with the merge engine
/// (the only writer) and the query surface.
#[derive(Debug)]
pub struct RegistryStore {
    state: ArcSwap<RegistryState>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::with_state(RegistryState::new())
    }

    pub fn with_state(state: RegistryState) -> Self {
        Self {
            state: ArcSwap::from_pointee(state),
        }
    }

    /// Current state. The returned `Arc` stays valid across later merges.
    pub fn snapshot(&self) -> Arc<RegistryState> {
        self.state.load_full()
    }

    pub(crate) fn publish(&self, state: RegistryState) {
        self.state.store(Arc::new(state));
    }

    /// Sources using `metric`; empty when unknown.
    pub fn get(&self, metric: &str) -> BTreeSet<SourceRef> {
        self.state
            .load()
            .get(metric)
            .map(|entry| entry.sources.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<(String, BTreeSet<SourceRef>)> {
        self.state
            .load()
            .metrics()
            .map(|(name, entry)| (name.clone(), entry.sources.keys().cloned().collect()))
            .collect()
    }

    pub fn list_invalid(&self) -> Vec<InvalidUsageEntry> {
        self.state.load().invalid().cloned().collect()
    }
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}
