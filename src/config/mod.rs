//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize, METRICS_USAGE_* overrides)
//!     → validation.rs (semantic checks)
//!     → UsageConfig (validated, immutable)
//!     → handed by reference to startup, which wires the subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    IngestConfig, ListenerConfig, LogFormat, ObservabilityConfig, OverflowPolicy, PersistenceConfig,
    SecurityConfig, TimeoutConfig, UsageConfig,
};
