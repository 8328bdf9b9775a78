//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID)
//!     → handlers.rs
//!         POST → registry queue (202, merge happens later)
//!         GET  → registry query surface
//!     → response.rs (JSON bodies, error mapping)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::{ApiError, MessageBody};
pub use server::{build_router, AppState, HttpServer};
