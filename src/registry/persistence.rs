//! Registry snapshot persistence.
//!
//! The registry is written as a JSON [`RegistryExport`] and reloaded at
//! startup. Loading drops metric entries without sources and rebuilds the
//! per-source index, so a reloaded registry satisfies the same invariants as
//! one built from merges.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time;

use crate::registry::query::RegistryExport;
use crate::registry::store::{RegistryState, RegistryStore};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt registry snapshot {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode registry snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load a snapshot. A missing file yields `Ok(None)`.
pub fn load(path: &Path) -> Result<Option<RegistryState>, PersistenceError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(io_error(path))?;
    let export: RegistryExport =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| PersistenceError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    let state = export.into_state();
    tracing::info!(
        path = %path.display(),
        metrics = state.metric_count(),
        invalid = state.invalid_count(),
        "Loaded registry snapshot"
    );
    Ok(Some(state))
}

/// Write a snapshot through a temporary sibling file and an atomic rename.
pub fn save(state: &RegistryState, path: &Path) -> Result<(), PersistenceError> {
    let export = RegistryExport::from_state(state);

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let file = File::create(&tmp).map_err(io_error(&tmp))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &export)?;
        writer.flush().map_err(io_error(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_error(path))?;

    tracing::debug!(
        path = %path.display(),
        generation = export.generation,
        metrics = export.metrics.len(),
        "Saved registry snapshot"
    );
    Ok(())
}

/// Background task writing the registry to disk when it changed.
pub struct SnapshotFlusher {
    store: Arc<RegistryStore>,
    path: PathBuf,
    interval: Duration,
    saved_generation: u64,
}

impl SnapshotFlusher {
    pub fn new(store: Arc<RegistryStore>, path: PathBuf, interval: Duration) -> Self {
        let saved_generation = store.snapshot().generation();
        Self {
            store,
            path,
            interval,
            saved_generation,
        }
    }

    /// Save if the registry changed since the last save. Returns whether a write happened.
    pub fn flush_if_changed(&mut self) -> Result<bool, PersistenceError> {
        let state = self.store.snapshot();
        if state.generation() == self.saved_generation {
            return Ok(false);
        }
        save(&state, &self.path)?;
        self.saved_generation = state.generation();
        Ok(true)
    }

    /// Flush periodically until shutdown. The flusher is handed back so the
    /// caller can do a last flush once the merge engine has drained.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Self {
        tracing::info!(
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "Snapshot flusher starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush_if_changed() {
                        tracing::error!(error = %e, "Failed to persist registry");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Snapshot flusher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::engine::apply_batch;
    use crate::registry::types::{Origin, ScanReport, SourceRef};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("registry-persistence");
        let mut state = RegistryState::new();
        let report = ScanReport::new(SourceRef::new("d1", Origin::Grafana))
            .with_metrics(["up", "run"])
            .with_invalid("up{", "parse error");
        apply_batch(&mut state, report.into_batch(), 7);
        state.generation = 4;

        save(&state, &path).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.generation(), 4);
        assert_eq!(loaded.metric_count(), 2);
        assert_eq!(loaded.invalid_count(), 1);
        assert_eq!(
            loaded.footprint(&SourceRef::new("d1", Origin::Grafana)).unwrap().metrics.len(),
            2
        );

        fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load(&temp_path("registry-missing")).unwrap().is_none());
    }

    #[test]
    fn test_load_drops_empty_entries() {
        let path = temp_path("registry-empty-entries");
        fs::write(
            &path,
            r#"{"generation":3,"metrics":[
                {"name":"gone","sources":[]},
                {"name":"kept","sources":[{"id":"d1","origin":"grafana","last_seen":1}]}
            ],"invalid":[]}"#,
        )
        .unwrap();

        let state = load(&path).unwrap().unwrap();
        assert!(state.get("gone").is_none());
        assert!(state.get("kept").is_some());
        fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_load_corrupt_file() {
        let path = temp_path("registry-corrupt");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(PersistenceError::Decode { .. })));
        fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_flush_only_when_changed() {
        let path = temp_path("registry-flusher");
        let store = Arc::new(RegistryStore::new());
        let mut flusher = SnapshotFlusher::new(store.clone(), path.clone(), Duration::from_secs(60));
        assert!(!flusher.flush_if_changed().unwrap());

        let mut next = (*store.snapshot()).clone();
        apply_batch(
            &mut next,
            ScanReport::new(SourceRef::new("g", Origin::PrometheusRule))
                .with_metrics(["up"])
                .into_batch(),
            1,
        );
        next.generation += 1;
        store.publish(next);

        assert!(flusher.flush_if_changed().unwrap());
        assert!(!flusher.flush_if_changed().unwrap());
        assert!(path.exists());
        fs::remove_file(&path).unwrap_or_default();
    }
}
