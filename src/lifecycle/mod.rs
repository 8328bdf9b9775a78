//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load snapshot → Build registry → Spawn merge engine + flusher
//!
//! Shutdown (shutdown.rs):
//!     Signal received → HTTP server stops accepting, finishes in-flight requests
//!     → Services::stop → Merge engine drains queue → Final snapshot → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then registry, then listeners
//! - Ordered shutdown: stop accept, drain, persist
//! - Two coordinators: the process-wide one stops the server, the one inside
//!   `Services` stops the registry tasks once the server is gone

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, Services, StartupError};
