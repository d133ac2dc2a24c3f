//! RPC server assembled from options.
//!
//! The pipeline (credentials, tracing, stats hook, interceptor chains) is
//! fixed at construction. `start` binds and serves until `stop` is called.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic::transport::ServerTlsConfig;

use crate::config::RpcConfig;
use crate::transport::rpc::call::{RpcInterceptor, Side, StatsHandler};
use crate::transport::rpc::layer::{CallPipeline, RpcLayer};
use crate::transport::{configured_address, Server, TransportError};

/// Port used when none is configured.
pub const DEFAULT_RPC_PORT: u16 = 50051;

type RegisterFn = Box<dyn FnOnce(&mut Registrar) + Send>;

/// Handle given to service registration callbacks.
pub struct Registrar {
    routes: RoutesBuilder,
    stream_methods: HashSet<String>,
}

impl Registrar {
    fn new() -> Self {
        Self {
            routes: RoutesBuilder::default(),
            stream_methods: HashSet::new(),
        }
    }

    /// Route table services are added to.
    pub fn routes(&mut self) -> &mut RoutesBuilder {
        &mut self.routes
    }

    /// Mark a full method path (`/pkg.Service/Method`) as streaming so it
    /// passes through the stream interceptor chain.
    pub fn streaming(&mut self, method: impl Into<String>) -> &mut Self {
        self.stream_methods.insert(method.into());
        self
    }
}

/// Builder for [`RpcServer`]. Repeated calls overwrite earlier values.
pub struct RpcServerOptions {
    port: u16,
    credentials: Option<ServerTlsConfig>,
    stats_handler: Option<Arc<dyn StatsHandler>>,
    tracing_enabled: bool,
    unary_interceptors: Vec<RpcInterceptor>,
    stream_interceptors: Vec<RpcInterceptor>,
    stream_methods: HashSet<String>,
    service_register: Option<RegisterFn>,
}

impl Default for RpcServerOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_RPC_PORT,
            credentials: None,
            stats_handler: None,
            tracing_enabled: true,
            unary_interceptors: Vec::new(),
            stream_interceptors: Vec::new(),
            stream_methods: HashSet::new(),
            service_register: None,
        }
    }
}

impl RpcServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded from the `[rpc]` config section.
    pub fn from_config(config: &RpcConfig) -> Self {
        Self {
            port: config.port,
            tracing_enabled: config.tracing_enabled,
            stream_methods: config.stream_methods.iter().cloned().collect(),
            ..Self::default()
        }
    }

    /// Port to listen on; 0 picks an ephemeral port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, tls: ServerTlsConfig) -> Self {
        self.credentials = Some(tls);
        self
    }

    /// Attached in addition to tracing when tracing is enabled.
    pub fn with_stats_handler(mut self, handler: Arc<dyn StatsHandler>) -> Self {
        self.stats_handler = Some(handler);
        self
    }

    pub fn with_tracing_enabled(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn with_unary_interceptors(mut self, interceptors: Vec<RpcInterceptor>) -> Self {
        self.unary_interceptors = interceptors;
        self
    }

    pub fn with_stream_interceptors(mut self, interceptors: Vec<RpcInterceptor>) -> Self {
        self.stream_interceptors = interceptors;
        self
    }

    /// Callback run right after construction with the server's registrar.
    pub fn with_service_register<F>(mut self, register: F) -> Self
    where
        F: FnOnce(&mut Registrar) + Send + 'static,
    {
        self.service_register = Some(Box::new(register));
        self
    }
}

struct Prepared {
    routes: RoutesBuilder,
    layer: RpcLayer,
    credentials: Option<ServerTlsConfig>,
}

/// RPC server bound to `0.0.0.0:port` on start.
pub struct RpcServer {
    port: u16,
    prepared: Mutex<Option<Prepared>>,
    shutdown: CancellationToken,
    bound: OnceLock<SocketAddr>,
}

impl RpcServer {
    /// Build a server; `register` adds services before the options' own
    /// registration callback runs.
    pub fn new<F>(register: F, options: RpcServerOptions) -> Self
    where
        F: FnOnce(&mut Registrar),
    {
        let mut registrar = Registrar::new();
        register(&mut registrar);
        if let Some(callback) = options.service_register {
            callback(&mut registrar);
        }

        let mut stream_methods = options.stream_methods;
        stream_methods.extend(registrar.stream_methods);

        let layer = RpcLayer::new(CallPipeline {
            side: Side::Server,
            tracing_enabled: options.tracing_enabled,
            stats: options.stats_handler,
            unary: options.unary_interceptors,
            stream: options.stream_interceptors,
            stream_methods,
        });

        Self {
            port: options.port,
            prepared: Mutex::new(Some(Prepared {
                routes: registrar.routes,
                layer,
                credentials: options.credentials,
            })),
            shutdown: CancellationToken::new(),
            bound: OnceLock::new(),
        }
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.get().copied()
    }

    fn take_prepared(&self) -> Option<Prepared> {
        self.prepared.lock().ok().and_then(|mut prepared| prepared.take())
    }
}

#[async_trait]
impl Server for RpcServer {
    async fn start(&self) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        let prepared = self
            .take_prepared()
            .ok_or(TransportError::AlreadyStarted { scheme: self.scheme() })?;

        let mut builder = tonic::transport::Server::builder();
        if let Some(tls) = prepared.credentials {
            builder = builder.tls_config(tls).map_err(TransportError::Tls)?;
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local = listener.local_addr()?;
        let _ = self.bound.set(local);

        tracing::info!(address = %local, "RPC server starting");

        builder
            .layer(prepared.layer)
            .add_routes(prepared.routes.routes())
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                self.shutdown.clone().cancelled_owned(),
            )
            .await
            .map_err(TransportError::Rpc)?;

        tracing::info!(address = %local, "RPC server stopped");
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        Ok(())
    }

    fn address(&self) -> String {
        match self.local_addr() {
            Some(addr) => addr.to_string(),
            None => configured_address(self.port),
        }
    }

    fn scheme(&self) -> &'static str {
        "GRPC"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_last_write_wins() {
        let options = RpcServerOptions::new()
            .with_port(1)
            .with_port(2)
            .with_tracing_enabled(false)
            .with_tracing_enabled(true);
        assert_eq!(options.port, 2);
        assert!(options.tracing_enabled);
    }

    #[test]
    fn register_callback_runs_at_construction() {
        let options = RpcServerOptions::new().with_service_register(|registrar| {
            registrar.streaming("/demo.Feed/Watch");
        });
        let server = RpcServer::new(|_| {}, options);

        assert_eq!(server.scheme(), "GRPC");
        assert_eq!(server.address(), ":50051");
        let prepared = server.take_prepared();
        assert!(prepared.is_some());
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op_start() {
        let server = RpcServer::new(|_| {}, RpcServerOptions::new().with_port(0));
        server.stop().unwrap();
        server.stop().unwrap();
        assert!(server.start().await.is_ok());
    }
}
