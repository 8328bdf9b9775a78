//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the metrics usage service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UsageConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Ingestion queue and merge settings.
    pub ingest: IngestConfig,

    /// Optional on-disk snapshot of the registry.
    pub persistence: PersistenceConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request limits.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// What happens when a bounded ingestion queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The producer waits for free space (backpressure).
    #[default]
    Block,
    /// The incoming batch is rejected and counted.
    DropNewest,
}

/// Ingestion queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum buffered batches. `None` means unbounded.
    pub capacity: Option<usize>,

    /// Policy applied when `capacity` is reached.
    pub overflow: OverflowPolicy,

    /// Maximum batches folded into one published merge.
    ///
    /// Every merge copies the key index of the current state (entries are
    /// shared), so larger values amortize that copy under heavy ingestion.
    pub max_batch: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::Block,
            max_batch: 64,
        }
    }
}

/// Registry persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Load the registry at startup and flush it periodically.
    pub enabled: bool,

    /// Path of the JSON snapshot.
    pub path: String,

    /// Flush interval in seconds.
    pub flush_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./registry.json".to_string(),
            flush_interval_secs: 300,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // rule groups can be large
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: UsageConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.ingest.capacity, None);
        assert!(!config.persistence.enabled);
    }

    #[test]
    fn test_ingest_section() {
        let config: UsageConfig = toml::from_str(
            r#"
            [ingest]
            capacity = 128
            overflow = "drop_newest"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.ingest.capacity, Some(128));
        assert_eq!(config.ingest.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.ingest.max_batch, 64);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
