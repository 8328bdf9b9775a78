//! Read-only views over the registry.
//!
//! Every call works on a single published state, so results never mix two merges.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::stats::{RegistryStats, StatsSnapshot};
use crate::registry::store::{InvalidUsageEntry, MetricEntry, RegistryState, RegistryStore};
use crate::registry::types::{Origin, SourceRef};

/// One source using a metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUsage {
    pub id: String,
    pub origin: Origin,
    pub last_seen: u64,
}

impl SourceUsage {
    fn new(source: &SourceRef, last_seen: u64) -> Self {
        Self {
            id: source.id.clone(),
            origin: source.origin,
            last_seen,
        }
    }

    pub fn source_ref(&self) -> SourceRef {
        SourceRef::new(self.id.clone(), self.origin)
    }
}

/// A metric and the sources using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub sources: Vec<SourceUsage>,
}

impl MetricRecord {
    fn from_entry(name: &str, entry: &MetricEntry, origin: Option<Origin>) -> Self {
        Self {
            name: name.to_string(),
            sources: entry
                .sources
                .iter()
                .filter(|(source, _)| origin.map_or(true, |o| source.origin == o))
                .map(|(source, last_seen)| SourceUsage::new(source, *last_seen))
                .collect(),
        }
    }
}

/// Answer to "is this metric used anywhere?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricUsage {
    pub name: String,
    pub found: bool,
    pub sources: Vec<SourceUsage>,
}

/// Listing filter. `origin` keeps metrics used by at least one source of that
/// origin and only shows those sources.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListFilter {
    pub origin: Option<Origin>,
    pub prefix: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InvalidFilter {
    /// Source id.
    pub source: Option<String>,
    pub origin: Option<Origin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: usize,
    pub offset: usize,
    pub items: Vec<T>,
}

/// Full registry snapshot; also the persisted file format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryExport {
    pub generation: u64,
    pub metrics: Vec<MetricRecord>,
    pub invalid: Vec<InvalidUsageEntry>,
}

impl RegistryExport {
    pub fn from_state(state: &RegistryState) -> Self {
        Self {
            generation: state.generation(),
            metrics: state
                .metrics()
                .map(|(name, entry)| MetricRecord::from_entry(name, entry, None))
                .collect(),
            invalid: state.invalid().cloned().collect(),
        }
    }

    /// Rebuild a state, discarding records that would break its invariants.
    pub fn into_state(self) -> RegistryState {
        let mut state = RegistryState::new();
        for record in self.metrics {
            if record.name.trim().is_empty() {
                continue;
            }
            for usage in record.sources {
                if usage.id.trim().is_empty() {
                    continue;
                }
                Arc::make_mut(state.metrics.entry(record.name.clone()).or_default())
                    .sources
                    .insert(usage.source_ref(), usage.last_seen);
            }
        }
        for entry in self.invalid {
            if entry.expression.trim().is_empty() || entry.source.id.trim().is_empty() {
                continue;
            }
            state
                .invalid
                .insert((entry.expression.clone(), entry.source.clone()), entry);
        }
        state.rebuild_index();
        state.generation = self.generation;
        state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub generation: u64,
    pub metrics: usize,
    pub invalid_usages: usize,
    pub sources: usize,
    #[serde(flatten)]
    pub ingest: StatsSnapshot,
}

/// Query adapter handed to the HTTP layer.
#[derive(Debug, Clone)]
pub struct QuerySurface {
    store: Arc<RegistryStore>,
    stats: Arc<RegistryStats>,
}

impl QuerySurface {
    pub fn new(store: Arc<RegistryStore>, stats: Arc<RegistryStats>) -> Self {
        Self { store, stats }
    }

    pub fn get_metric(&self, name: &str) -> MetricUsage {
        let state = self.store.snapshot();
        match state.get(name) {
            Some(entry) => MetricUsage {
                name: name.to_string(),
                found: true,
                sources: MetricRecord::from_entry(name, entry, None).sources,
            },
            None => MetricUsage {
                name: name.to_string(),
                found: false,
                sources: Vec::new(),
            },
        }
    }

    pub fn list(&self, filter: &ListFilter) -> Page<MetricRecord> {
        let state = self.store.snapshot();
        let prefix = filter.prefix.as_deref().unwrap_or("");
        let matching: Vec<MetricRecord> = state
            .metrics()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, entry)| MetricRecord::from_entry(name, entry, filter.origin))
            .filter(|record| !record.sources.is_empty())
            .collect();

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Page {
            total,
            offset: filter.offset,
            items,
        }
    }

    pub fn list_invalid(&self, filter: &InvalidFilter) -> Vec<InvalidUsageEntry> {
        self.store
            .snapshot()
            .invalid()
            .filter(|e| filter.source.as_deref().map_or(true, |id| e.source.id == id))
            .filter(|e| filter.origin.map_or(true, |o| e.source.origin == o))
            .cloned()
            .collect()
    }

    pub fn export(&self) -> RegistryExport {
        RegistryExport::from_state(&self.store.snapshot())
    }

    pub fn stats(&self) -> StatsReport {
        let state = self.store.snapshot();
        StatsReport {
            generation: state.generation(),
            metrics: state.metric_count(),
            invalid_usages: state.invalid_count(),
            sources: state.source_count(),
            ingest: self.stats.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::engine::apply_batch;
    use crate::registry::types::ScanReport;

    fn surface() -> QuerySurface {
        let mut state = RegistryState::new();
        let batches = [
            ScanReport::new(SourceRef::new("d1", Origin::Grafana))
                .with_metrics(["node_cpu_seconds_total", "up"])
                .with_invalid("sum(rate(x[5m]", "unclosed paren"),
            ScanReport::new(SourceRef::new("g1", Origin::PrometheusRule))
                .with_metrics(["up", "node_memory_bytes"]),
        ];
        for report in batches {
            apply_batch(&mut state, report.into_batch(), 42);
        }
        state.generation = 2;
        QuerySurface::new(
            Arc::new(RegistryStore::with_state(state)),
            Arc::new(RegistryStats::new()),
        )
    }

    #[test]
    fn test_get_metric() {
        let query = surface();
        let up = query.get_metric("up");
        assert!(up.found);
        assert_eq!(up.sources.len(), 2);
        assert_eq!(up.sources[0].last_seen, 42);

        let missing = query.get_metric("nope");
        assert!(!missing.found);
        assert!(missing.sources.is_empty());
    }

    #[test]
    fn test_list_filters_and_pages() {
        let query = surface();
        let all = query.list(&ListFilter::default());
        assert_eq!(all.total, 3);

        let node = query.list(&ListFilter {
            prefix: Some("node_".into()),
            limit: Some(1),
            ..ListFilter::default()
        });
        assert_eq!(node.total, 2);
        assert_eq!(node.items.len(), 1);
        assert_eq!(node.items[0].name, "node_cpu_seconds_total");

        let rules = query.list(&ListFilter {
            origin: Some(Origin::PrometheusRule),
            ..ListFilter::default()
        });
        let names: Vec<_> = rules.items.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["node_memory_bytes", "up"]);
        assert!(rules.items.iter().all(|r| r.sources.len() == 1));
    }

    #[test]
    fn test_list_invalid_filter() {
        let query = surface();
        assert_eq!(query.list_invalid(&InvalidFilter::default()).len(), 1);
        let none = query.list_invalid(&InvalidFilter {
            source: Some("g1".into()),
            origin: None,
        });
        assert!(none.is_empty());
    }

    #[test]
    fn test_export_round_trip_restores_index() {
        let query = surface();
        let export = query.export();
        let state = export.clone().into_state();
        assert_eq!(state.generation(), 2);
        assert_eq!(state.source_count(), 2);
        assert_eq!(RegistryExport::from_state(&state), export);
    }

    #[test]
    fn test_import_drops_empty_entries() {
        let export = RegistryExport {
            generation: 1,
            metrics: vec![MetricRecord {
                name: "orphan".into(),
                sources: Vec::new(),
            }],
            invalid: vec![InvalidUsageEntry {
                expression: " ".into(),
                source: SourceRef::new("d1", Origin::Grafana),
                detail: String::new(),
                last_seen: 0,
            }],
        };
        let state = export.into_state();
        assert_eq!(state.metric_count(), 0);
        assert_eq!(state.invalid_count(), 0);
        assert_eq!(state.source_count(), 0);
    }

    #[test]
    fn test_stats() {
        let stats = surface().stats();
        assert_eq!(stats.metrics, 3);
        assert_eq!(stats.invalid_usages, 1);
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.generation, 2);
    }
}
