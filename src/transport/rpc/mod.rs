//! RPC transport built on tonic.
//!
//! # Data Flow
//! ```text
//! Server: TCP accept → RpcLayer (span, stats, unary|stream chain) → routes
//! Client: generated stub → RpcLayer (span, stats, chain) → Channel → network
//! ```
//!
//! # Design Decisions
//! - One tower layer serves both sides; only the rejection mapping differs
//! - Interceptors see metadata and extensions, never message bodies
//! - Streaming methods are declared up front, since HTTP/2 framing does not say

pub mod body;
pub mod call;
pub mod client;
pub mod layer;
pub mod server;

pub use body::RpcBody;
pub use call::{CallKind, RpcCall, RpcInterceptor, RpcReply, Side, StatsHandler};
pub use client::{dial, DnsResolver, Resolver, RpcChannel, RpcClientOptions, StaticResolver};
pub use layer::{RpcLayer, RpcService};
pub use server::{Registrar, RpcServer, RpcServerOptions, DEFAULT_RPC_PORT};
