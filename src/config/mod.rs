//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → RpcServerOptions::from_config / HttpServerOptions::from_config / RedisOptions::from_config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - Every section defaults, so an empty file starts a local demo
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BatchPolicy, HttpConfig, ObservabilityConfig, RedisConfig, RpcConfig, ServiceConfig,
};
pub use validation::{validate_config, ValidationError};
