//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, trace_id when a trace is active)
//!     → metrics.rs (counters, histograms)
//!     → spans from the RPC layer and store hooks
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → OTLP collector via tracing.rs (optional)
//! ```
//!
//! # Design Decisions
//! - RPC and store spans carry `otel.*` fields so the OTLP layer names them
//! - The recorder is global; interceptors only call the `metrics` macros
//! - Span export is optional; spans still feed logs when it is off

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::logging::{init_logging, trace_id, LoggingError};
pub use self::metrics::{install_recorder, metrics_router, ServerMetrics};
pub use self::tracing::{init_tracer, shutdown_tracer};
