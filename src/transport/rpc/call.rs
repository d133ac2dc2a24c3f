//! Call view seen by RPC interceptors and stats handlers.
//!
//! The request and response bodies stay with the transport; interceptors see
//! the method, call kind, metadata and extensions, which is everything a
//! cross-cutting concern (auth, metrics, tracing, validation of headers) needs.

use std::sync::Arc;
use std::time::Duration;

use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use crate::interceptor::Interceptor;

/// Whether a method exchanges a single message or a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    Streaming,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::Streaming => "stream",
        }
    }
}

/// Which end of the connection a call path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Server => "server",
            Side::Client => "client",
        }
    }
}

/// Incoming (server) or outgoing (client) call.
#[derive(Debug)]
pub struct RpcCall {
    /// Full method path, e.g. `/grpc.health.v1.Health/Check`.
    pub method: String,
    pub kind: CallKind,
    pub side: Side,
    pub metadata: MetadataMap,
    /// Per-call context shared with downstream interceptors and handlers.
    pub extensions: http::Extensions,
}

impl RpcCall {
    /// Method name without the service prefix.
    pub fn method_name(&self) -> &str {
        self.method
            .rsplit_once('/')
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
    }

    /// Service name without the leading slash.
    pub fn service_name(&self) -> &str {
        self.method
            .trim_start_matches('/')
            .split_once('/')
            .map(|(service, _)| service)
            .unwrap_or("unknown")
    }
}

/// Response headers of a call.
#[derive(Debug)]
pub struct RpcReply {
    pub metadata: MetadataMap,
    pub extensions: http::Extensions,
}

impl RpcReply {
    pub fn new(metadata: MetadataMap) -> Self {
        Self {
            metadata,
            extensions: http::Extensions::new(),
        }
    }

    /// Status carried in the reply metadata.
    ///
    /// Stream replies have their trailers merged in once the stream ends.
    /// Unary replies only carry a status when the response is trailers-only;
    /// otherwise they read as `Code::Ok`.
    pub fn code(&self) -> Code {
        self.metadata
            .get("grpc-status")
            .map(|value| Code::from_bytes(value.as_bytes()))
            .unwrap_or(Code::Ok)
    }
}

/// Outcome code of an intercepted call.
pub fn outcome_code(result: &Result<RpcReply, Status>) -> Code {
    match result {
        Ok(reply) => reply.code(),
        Err(status) => status.code(),
    }
}

/// Interceptor over RPC calls; used for both unary and stream chains.
pub type RpcInterceptor = Arc<dyn Interceptor<RpcCall, RpcReply, Status>>;

/// Observer notified at the start and end of every call.
///
/// Attached independently from the tracing span and from interceptors; it
/// cannot alter the call.
pub trait StatsHandler: Send + Sync + 'static {
    fn handle_begin(&self, _call: &RpcCall) {}

    fn handle_end(&self, method: &str, kind: CallKind, side: Side, code: Code, elapsed: Duration);
}
