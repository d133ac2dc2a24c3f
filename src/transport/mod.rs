//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! Options (builder methods, last write wins)
//!     → RpcServer::new / HttpServer::new / rpc::dial
//!     → credentials + tracing + stats hook + interceptor chains wired once
//!     → Server handle registered with lifecycle::Group
//!
//! Server lifecycle:
//!     new → start (binds, blocks until stopped) → stop (signals, returns promptly)
//! ```
//!
//! # Design Decisions
//! - Binding happens in `start`, so bind failures surface through the group
//! - `stop` is idempotent and safe before `start`
//! - Options are owned by the builder and never shared between servers

pub mod rpc;

use async_trait::async_trait;
use std::net::SocketAddr;

/// Boxed error type used on the call path.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A long-running network server managed by the lifecycle group.
#[async_trait]
pub trait Server: Send + Sync {
    /// Bind and serve until stopped or failed.
    async fn start(&self) -> Result<(), TransportError>;

    /// Request termination. Never blocks on the wind-down.
    fn stop(&self) -> Result<(), TransportError>;

    /// Bound address once started, configured address before.
    fn address(&self) -> String;

    /// Short protocol label for logs.
    fn scheme(&self) -> &'static str;
}

/// Errors raised while building or running a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{scheme} server already started")]
    AlreadyStarted { scheme: &'static str },

    #[error("invalid TLS configuration: {0}")]
    Tls(#[source] tonic::transport::Error),

    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("no endpoints resolved for target '{0}'")]
    NoEndpoints(String),

    #[error("resolver for '{target}' failed: {reason}")]
    Resolve { target: String, reason: String },

    #[error("rpc server failed: {0}")]
    Rpc(#[source] tonic::transport::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Address string used before a server has bound.
pub(crate) fn configured_address(port: u16) -> String {
    format!(":{}", port)
}
