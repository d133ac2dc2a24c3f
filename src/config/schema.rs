//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every section defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for a service process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// RPC server settings.
    pub rpc: RpcConfig,

    /// HTTP server settings.
    pub http: HttpConfig,

    /// Key-value store client settings.
    pub redis: RedisConfig,

    /// Logging, tracing and metrics settings.
    pub observability: ObservabilityConfig,
}

/// RPC server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,

    /// Open a span per call.
    pub tracing_enabled: bool,

    /// Full method paths routed through the stream interceptor chain.
    pub stream_methods: Vec<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            port: 50051,
            tracing_enabled: true,
            stream_methods: Vec::new(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,

    /// Per-request timeout; 0 disables it.
    pub request_timeout_secs: u64,

    /// Emit a span per request.
    pub tracing_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            request_timeout_secs: 30,
            tracing_enabled: true,
        }
    }
}

/// How a batch proceeds after one command fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Send everything; each command keeps its own outcome.
    #[default]
    Continue,

    /// Send in order; commands after the first failure are skipped.
    StopOnError,
}

/// Key-value store client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,

    /// Logical database index.
    pub db: i64,

    pub batch_policy: BatchPolicy,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            batch_policy: BatchPolicy::Continue,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: String,

    /// Expose the metrics endpoint.
    pub metrics_enabled: bool,

    /// OTLP collector endpoint; spans are only exported when set.
    pub otlp_endpoint: Option<String>,

    /// Reported as `service.name` on exported spans.
    pub service_name: String,

    /// Fraction of traces sampled, in [0, 1].
    pub sampling_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            otlp_endpoint: None,
            service_name: "servicekit".to_string(),
            sampling_rate: 1.0,
        }
    }
}
