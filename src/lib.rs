//! Metric usage registry service library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod registry;

pub use config::UsageConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::Registry;
