//! Service runtime toolkit: transports, interceptor chains, a hooked
//! key-value client, and a lifecycle group that runs them together.

// Core subsystems
pub mod config;
pub mod http;
pub mod interceptor;
pub mod kv;
pub mod transport;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use crate::config::ServiceConfig;
pub use crate::http::HttpServer;
pub use crate::lifecycle::Group;
pub use crate::transport::rpc::RpcServer;
pub use crate::transport::{BoxError, Server, TransportError};

#[doc(hidden)]
pub use ::tracing as __tracing;
