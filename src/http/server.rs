//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap the supplied axum handler with request ID, tracing and timeout layers
//! - Bind `0.0.0.0:port` on start
//! - Serve until stopped, draining in-flight requests

use axum::Router;
use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::HttpConfig;
use crate::transport::{configured_address, Server, TransportError};

/// Port used when none is configured.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Builder for [`HttpServer`]. Repeated calls overwrite earlier values.
pub struct HttpServerOptions {
    port: u16,
    handler: Option<Router>,
    tracing_enabled: bool,
    request_timeout: Option<Duration>,
}

impl Default for HttpServerOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            handler: None,
            tracing_enabled: true,
            request_timeout: None,
        }
    }
}

impl HttpServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded from the `[http]` config section.
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            port: config.port,
            tracing_enabled: config.tracing_enabled,
            request_timeout: (config.request_timeout_secs > 0)
                .then(|| Duration::from_secs(config.request_timeout_secs)),
            ..Self::default()
        }
    }

    /// Port to listen on; 0 picks an ephemeral port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_handler(mut self, handler: Router) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_tracing_enabled(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// HTTP server hosting a single handler. Without one, every path is 404.
pub struct HttpServer {
    port: u16,
    router: Mutex<Option<Router>>,
    shutdown: CancellationToken,
    bound: OnceLock<SocketAddr>,
}

impl HttpServer {
    pub fn new(options: HttpServerOptions) -> Self {
        let router = Self::build_router(&options);
        Self {
            port: options.port,
            router: Mutex::new(Some(router)),
            shutdown: CancellationToken::new(),
            bound: OnceLock::new(),
        }
    }

    /// Wrap the handler with the middleware layers.
    #[allow(deprecated)]
    fn build_router(options: &HttpServerOptions) -> Router {
        let mut router = options.handler.clone().unwrap_or_default();
        if let Some(timeout) = options.request_timeout {
            router = router.layer(TimeoutLayer::new(timeout));
        }
        router = router.layer(PropagateRequestIdLayer::x_request_id());
        if options.tracing_enabled {
            router = router.layer(TraceLayer::new_for_http());
        }
        router.layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.get().copied()
    }
}

#[async_trait::async_trait]
impl Server for HttpServer {
    async fn start(&self) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        let router = self
            .router
            .lock()
            .ok()
            .and_then(|mut router| router.take())
            .ok_or(TransportError::AlreadyStarted { scheme: self.scheme() })?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local = listener.local_addr()?;
        let _ = self.bound.set(local);

        tracing::info!(address = %local, "HTTP server starting");

        axum::serve(listener, router)
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await?;

        tracing::info!(address = %local, "HTTP server stopped");
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
        "HTTP"
    }
}
