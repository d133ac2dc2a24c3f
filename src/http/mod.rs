//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → SetRequestId (x-request-id, UUID v4 when absent)
//!     → TraceLayer (when tracing is enabled)
//!     → PropagateRequestId → Timeout
//!     → user handler (axum Router)
//! ```

pub mod server;

pub use server::{HttpServer, HttpServerOptions, DEFAULT_HTTP_PORT};
