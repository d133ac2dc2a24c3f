//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Provide context-aware log macros carrying the active trace id
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level configurable via config and environment (RUST_LOG wins)

use opentelemetry::trace::TraceContextExt;
use tracing_opentelemetry::{OpenTelemetryLayer, OpenTelemetrySpanExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ObservabilityConfig;
use crate::observability::tracing::init_tracer;

/// Error raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to build tracer: {0}")]
    Tracer(#[from] opentelemetry::trace::TraceError),

    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber: env filter, fmt output, and span export
/// when an OTLP endpoint is configured.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.log_format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => Some(OpenTelemetryLayer::new(init_tracer(
            endpoint,
            config.sampling_rate,
            &config.service_name,
        )?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;
    Ok(())
}

/// Trace id of the current span, when it belongs to a valid trace.
pub fn trace_id() -> Option<String> {
    let context = tracing::Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

/// `tracing::debug!` plus a `trace_id` field when a trace is active.
#[macro_export]
macro_rules! ctx_debug {
    ($($arg:tt)+) => {
        match $crate::observability::logging::trace_id() {
            Some(trace_id) => $crate::__tracing::debug!(trace_id = %trace_id, $($arg)+),
            None => $crate::__tracing::debug!($($arg)+),
        }
    };
}

/// `tracing::info!` plus a `trace_id` field when a trace is active.
#[macro_export]
macro_rules! ctx_info {
    ($($arg:tt)+) => {
        match $crate::observability::logging::trace_id() {
            Some(trace_id) => $crate::__tracing::info!(trace_id = %trace_id, $($arg)+),
            None => $crate::__tracing::info!($($arg)+),
        }
    };
}

/// `tracing::warn!` plus a `trace_id` field when a trace is active.
#[macro_export]
macro_rules! ctx_warn {
    ($($arg:tt)+) => {
        match $crate::observability::logging::trace_id() {
            Some(trace_id) => $crate::__tracing::warn!(trace_id = %trace_id, $($arg)+),
            None => $crate::__tracing::warn!($($arg)+),
        }
    };
}

/// `tracing::error!` plus a `trace_id` field when a trace is active.
#[macro_export]
macro_rules! ctx_error {
    ($($arg:tt)+) => {
        match $crate::observability::logging::trace_id() {
            Some(trace_id) => $crate::__tracing::error!(trace_id = %trace_id, $($arg)+),
            None => $crate::__tracing::error!($($arg)+),
        }
    };
}
