//! Startup orchestration.
//!
//! # Responsibilities
//! - Restore the registry from its snapshot (when persistence is enabled)
//! - Wire queue, merge engine, store and query surface
//! - Start background tasks (merge engine, snapshot flusher)
//! - Stop them in order on shutdown
//!
//! # Design Decisions
//! - Fail fast: a corrupt snapshot is a startup error, not an empty registry
//! - Background tasks listen to a coordinator owned by `Services`, not to the
//!   process-wide one; they keep merging until `Services::stop` after the HTTP
//!   server has finished its in-flight requests
//! - The merge engine drains before the final snapshot is written

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::UsageConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::registry::persistence::{self, PersistenceError, SnapshotFlusher};
use crate::registry::{Registry, RegistryState};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to restore registry: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Running registry plus the tasks that keep it alive.
pub struct Services {
    pub registry: Registry,
    /// Stops the merge engine and flusher; fired only by [`Services::stop`].
    shutdown: Shutdown,
    merge_task: JoinHandle<()>,
    flush_task: Option<JoinHandle<SnapshotFlusher>>,
}

/// Build the registry and spawn its background tasks. Must run inside a Tokio runtime.
pub fn start(config: &UsageConfig) -> Result<Services, StartupError> {
    let state = if config.persistence.enabled {
        persistence::load(&PathBuf::from(&config.persistence.path))?.unwrap_or_default()
    } else {
        RegistryState::new()
    };

    let (registry, engine) = Registry::build(state, &config.ingest);
    tracing::info!(
        metrics = registry.store.snapshot().metric_count(),
        capacity = ?config.ingest.capacity,
        overflow = ?config.ingest.overflow,
        "Registry initialized"
    );

    let shutdown = Shutdown::new();
    let merge_task = tokio::spawn(engine.run(shutdown.subscribe()));

    let flush_task = config.persistence.enabled.then(|| {
        let flusher = SnapshotFlusher::new(
            registry.store.clone(),
            PathBuf::from(&config.persistence.path),
            Duration::from_secs(config.persistence.flush_interval_secs),
        );
        tokio::spawn(flusher.run(shutdown.subscribe()))
    });

    Ok(Services {
        registry,
        shutdown,
        merge_task,
        flush_task,
    })
}

impl Services {
    /// Signal shutdown, wait for the merge engine to drain, then write the final snapshot.
    ///
    /// Call once nothing can enqueue anymore: batches offered afterwards get
    /// `QueueError::Closed`.
    pub async fn stop(self) {
        self.shutdown.trigger();

        if let Err(e) = self.merge_task.await {
            tracing::error!(error = %e, "Merge engine task failed");
        }

        if let Some(task) = self.flush_task {
            match task.await {
                Ok(mut flusher) => match flusher.flush_if_changed() {
                    Ok(written) => tracing::info!(written, "Final registry snapshot"),
                    Err(e) => tracing::error!(error = %e, "Failed to write final registry snapshot"),
                },
                Err(e) => tracing::error!(error = %e, "Snapshot flusher task failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EnqueueOutcome, Origin, QueueError, ScanReport, SourceRef};

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let path = std::env::temp_dir().join(format!("startup-{}.json", uuid::Uuid::new_v4()));
        let mut config = UsageConfig::default();
        config.persistence.enabled = true;
        config.persistence.path = path.to_string_lossy().into_owned();

        let services = start(&config).unwrap();
        let report = ScanReport::new(SourceRef::new("dash-1", Origin::Grafana)).with_metrics(["run"]);
        services.registry.queue.enqueue_scan(report).await.unwrap();
        services.stop().await;

        let services = start(&config).unwrap();
        assert!(services.registry.query.get_metric("run").found);
        services.stop().await;

        std::fs::remove_file(&path).unwrap_or_default();
    }

    #[tokio::test]
    async fn test_merging_continues_until_stop() {
        let process_shutdown = Shutdown::new();
        let mut server_rx = process_shutdown.subscribe();
        let services = start(&UsageConfig::default()).unwrap();
        let queue = services.registry.queue.clone();
        let query = services.registry.query.clone();

        // The HTTP server is draining: late requests must still be merged.
        process_shutdown.trigger();
        assert!(server_rx.recv().await.is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = ScanReport::new(SourceRef::new("dash-1", Origin::Grafana)).with_metrics(["run"]);
        assert_eq!(queue.enqueue_scan(report).await, Ok(EnqueueOutcome::Accepted));

        services.stop().await;
        assert!(query.get_metric("run").found);

        let late = ScanReport::new(SourceRef::new("dash-2", Origin::Grafana)).with_metrics(["up"]);
        assert_eq!(queue.enqueue_scan(late).await, Err(QueueError::Closed));
    }
}
