//! RPC client dialing.
//!
//! `dial` resolves a target into endpoints, applies credentials, and wraps
//! the resulting channel with the same call pipeline the server uses.
//!
//! Targets take one of two shapes:
//! - `scheme:///name`, handed to the resolver registered for `scheme`
//! - a plain address (`host:port` or a full URI), used as is

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::transport::rpc::call::{RpcInterceptor, Side, StatsHandler};
use crate::transport::rpc::layer::{CallPipeline, RpcLayer, RpcService};
use crate::transport::TransportError;
use tower::Layer;

/// Client channel with the call pipeline attached.
pub type RpcChannel = RpcService<Channel>;

/// Maps a target name to endpoint addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Scheme this resolver answers for, e.g. `dns`.
    fn scheme(&self) -> &str;

    /// Endpoints (`host:port` or full URIs) for `name`.
    async fn resolve(&self, name: &str) -> Result<Vec<String>, TransportError>;
}

/// Resolver returning a fixed endpoint list.
pub struct StaticResolver {
    scheme: String,
    endpoints: Vec<String>,
}

impl StaticResolver {
    pub fn new(scheme: impl Into<String>, endpoints: Vec<String>) -> Self {
        Self {
            scheme: scheme.into(),
            endpoints,
        }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn resolve(&self, _name: &str) -> Result<Vec<String>, TransportError> {
        Ok(self.endpoints.clone())
    }
}

/// Resolver backed by the system's host lookup; answers `dns:///host:port`.
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    fn scheme(&self) -> &str {
        "dns"
    }

    async fn resolve(&self, name: &str) -> Result<Vec<String>, TransportError> {
        let addrs = tokio::net::lookup_host(name)
            .await
            .map_err(|err| TransportError::Resolve {
                target: name.to_string(),
                reason: err.to_string(),
            })?;
        Ok(addrs.map(|addr| addr.to_string()).collect())
    }
}

/// Builder for [`dial`]. Repeated calls overwrite earlier values.
pub struct RpcClientOptions {
    resolvers: Vec<Arc<dyn Resolver>>,
    load_balance: bool,
    credentials: Option<ClientTlsConfig>,
    tracing_enabled: bool,
    stats_handler: Option<Arc<dyn StatsHandler>>,
    unary_interceptors: Vec<RpcInterceptor>,
    stream_interceptors: Vec<RpcInterceptor>,
    stream_methods: HashSet<String>,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            resolvers: vec![Arc::new(DnsResolver)],
            load_balance: true,
            credentials: None,
            tracing_enabled: true,
            stats_handler: None,
            unary_interceptors: Vec::new(),
            stream_interceptors: Vec::new(),
            stream_methods: HashSet::new(),
        }
    }
}

impl RpcClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the resolver set, including the built-in `dns` resolver.
    pub fn with_resolvers(mut self, resolvers: Vec<Arc<dyn Resolver>>) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Spread calls over every resolved endpoint instead of the first one.
    pub fn with_load_balance(mut self, enabled: bool) -> Self {
        self.load_balance = enabled;
        self
    }

    /// TLS credentials; plaintext when unset.
    pub fn with_credentials(mut self, tls: ClientTlsConfig) -> Self {
        self.credentials = Some(tls);
        self
    }

    pub fn with_tracing_enabled(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn with_stats_handler(mut self, handler: Arc<dyn StatsHandler>) -> Self {
        self.stats_handler = Some(handler);
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

    /// Route a full method path through the stream chain.
    pub fn with_stream_method(mut self, method: impl Into<String>) -> Self {
        self.stream_methods.insert(method.into());
        self
    }
}

/// Create a lazily connected channel to `target`.
///
/// Connection errors surface on the first call, not here; resolution and
/// endpoint parsing errors are returned immediately.
pub async fn dial(target: &str, options: RpcClientOptions) -> Result<RpcChannel, TransportError> {
    let addresses = resolve_target(target, &options.resolvers).await?;
    if addresses.is_empty() {
        return Err(TransportError::NoEndpoints(target.to_string()));
    }

    let secure = options.credentials.is_some();
    let mut endpoints = Vec::with_capacity(addresses.len());
    for address in addresses {
        let uri = endpoint_uri(&address, secure);
        let mut endpoint =
            Endpoint::from_shared(uri.clone()).map_err(|source| TransportError::InvalidEndpoint {
                endpoint: uri.clone(),
                source,
            })?;
        if let Some(tls) = options.credentials.clone() {
            endpoint = endpoint.tls_config(tls).map_err(TransportError::Tls)?;
        }
        endpoints.push(endpoint);
    }

    tracing::debug!(
        target = %target,
        endpoints = endpoints.len(),
        load_balance = options.load_balance,
        "Dialing RPC target"
    );

    let channel = if options.load_balance && endpoints.len() > 1 {
        Channel::balance_list(endpoints.into_iter())
    } else {
        endpoints.swap_remove(0).connect_lazy()
    };

    let layer = RpcLayer::new(CallPipeline {
        side: Side::Client,
        tracing_enabled: options.tracing_enabled,
        stats: options.stats_handler,
        unary: options.unary_interceptors,
        stream: options.stream_interceptors,
        stream_methods: options.stream_methods,
    });
    Ok(layer.layer(channel))
}

async fn resolve_target(
    target: &str,
    resolvers: &[Arc<dyn Resolver>],
) -> Result<Vec<String>, TransportError> {
    if let Some((scheme, name)) = target.split_once(":///") {
        if let Some(resolver) = resolvers.iter().find(|r| r.scheme() == scheme) {
            return resolver.resolve(name).await;
        }
        return Err(TransportError::Resolve {
            target: target.to_string(),
            reason: format!("no resolver registered for scheme '{}'", scheme),
        });
    }
    Ok(vec![target.to_string()])
}

fn endpoint_uri(address: &str, secure: bool) -> String {
    if address.contains("://") {
        address.to_string()
    } else if secure {
        format!("https://{}", address)
    } else {
        format!("http://{}", address)
    }
}
