//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus recorder
//! - Expose the scrape endpoint as an axum router
//! - Provide RPC interceptors and a stats hook recording call metrics
//!
//! # Metrics
//! - `rpc_server_started_total` (counter): calls started, by method and kind
//! - `rpc_server_handled_total` (counter): calls finished, by method, kind and code
//! - `rpc_server_handling_seconds` (histogram): handling latency, by method and kind
//! - `kv_commands_total` (counter): store commands, by command and status
//! - `kv_command_duration_seconds` (histogram): store command latency
//!
//! # Design Decisions
//! - Histogram buckets tuned for RPC latencies from 1ms up to 2 minutes
//! - A key-absent store reply counts as `status="ok"`

use std::future::ready;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tonic::{Code, Status};

use crate::interceptor::Next;
use crate::transport::rpc::call::{outcome_code, CallKind, RpcCall, RpcInterceptor, RpcReply, Side, StatsHandler};

/// Latency buckets, in seconds.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.01, 0.1, 0.3, 0.6, 1.0, 3.0, 6.0, 9.0, 20.0, 30.0, 60.0, 90.0, 120.0,
];

/// Install the global Prometheus recorder.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)?
        .install_recorder()
}

/// Router serving `GET /metrics` from `handle`.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || ready(handle.render())))
}

/// Interceptor factory and stats hook for server-side call metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerMetrics;

impl ServerMetrics {
    pub fn new() -> Self {
        Self
    }

    pub fn unary_interceptor(&self) -> RpcInterceptor {
        Arc::new(record_call)
    }

    /// Records once per stream lifetime, not per message.
    pub fn stream_interceptor(&self) -> RpcInterceptor {
        Arc::new(record_call)
    }
}

async fn record_call(
    call: RpcCall,
    next: Next<RpcCall, RpcReply, Status>,
) -> Result<RpcReply, Status> {
    let method = call.method.clone();
    let kind = call.kind.as_str();
    let started = Instant::now();

    let result = next.run(call).await;

    let code = outcome_code(&result);
    metrics::counter!(
        "rpc_server_handled_total",
        "method" => method.clone(),
        "kind" => kind,
        "code" => code_label(code)
    )
    .increment(1);
    metrics::histogram!(
        "rpc_server_handling_seconds",
        "method" => method,
        "kind" => kind
    )
    .record(started.elapsed().as_secs_f64());

    result
}

impl StatsHandler for ServerMetrics {
    fn handle_begin(&self, call: &RpcCall) {
        metrics::counter!(
            "rpc_server_started_total",
            "method" => call.method.clone(),
            "kind" => call.kind.as_str()
        )
        .increment(1);
    }

    fn handle_end(&self, method: &str, kind: CallKind, side: Side, code: Code, elapsed: Duration) {
        tracing::trace!(
            method,
            kind = kind.as_str(),
            side = side.as_str(),
            code = code_label(code),
            elapsed_ms = elapsed.as_millis() as u64,
            "RPC finished"
        );
    }
}

/// Canonical upper-case name of a status code.
pub fn code_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "CANCELLED",
        Code::Unknown => "UNKNOWN",
        Code::InvalidArgument => "INVALID_ARGUMENT",
        Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
        Code::NotFound => "NOT_FOUND",
        Code::AlreadyExists => "ALREADY_EXISTS",
        Code::PermissionDenied => "PERMISSION_DENIED",
        Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
        Code::FailedPrecondition => "FAILED_PRECONDITION",
        Code::Aborted => "ABORTED",
        Code::OutOfRange => "OUT_OF_RANGE",
        Code::Unimplemented => "UNIMPLEMENTED",
        Code::Internal => "INTERNAL",
        Code::Unavailable => "UNAVAILABLE",
        Code::DataLoss => "DATA_LOSS",
        Code::Unauthenticated => "UNAUTHENTICATED",
        #[allow(unreachable_patterns)]
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::chain;
    use tonic::metadata::MetadataMap;

    #[test]
    fn code_labels() {
        assert_eq!(code_label(Code::Ok), "OK");
        assert_eq!(code_label(Code::InvalidArgument), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn interceptor_passes_result_through() {
        let metrics = ServerMetrics::new();
        let terminal = Next::new(|_call: RpcCall| async {
            Err::<RpcReply, Status>(Status::not_found("gone"))
        });
        let call = RpcCall {
            method: "/demo.Echo/Say".to_string(),
            kind: CallKind::Unary,
            side: Side::Server,
            metadata: MetadataMap::new(),
            extensions: http::Extensions::new(),
        };

        let result = chain(&[metrics.unary_interceptor()], terminal).run(call).await;

        assert_eq!(result.unwrap_err().code(), Code::NotFound);
    }
}
