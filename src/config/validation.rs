//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sampling rate, ports)
//! - Detect conflicting listeners
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServiceConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("rpc.port and http.port are both {0}")]
    PortConflict(u16),

    #[error("observability.sampling_rate must be within [0, 1], got {0}")]
    SamplingRate(f64),

    #[error("unknown observability.log_format '{0}' (expected 'pretty' or 'json')")]
    LogFormat(String),

    #[error("redis.url must not be empty")]
    EmptyRedisUrl,

    #[error("redis.url '{0}' is not a valid URL")]
    InvalidRedisUrl(String),

    #[error("redis.db must not be negative, got {0}")]
    NegativeDatabase(i64),

    #[error("rpc.stream_methods entry '{0}' is not a /service/method path")]
    StreamMethod(String),
}

/// Check every semantic constraint and collect all failures.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.rpc.port != 0 && config.rpc.port == config.http.port {
        errors.push(ValidationError::PortConflict(config.rpc.port));
    }

    for method in &config.rpc.stream_methods {
        let valid = method
            .strip_prefix('/')
            .and_then(|rest| rest.split_once('/'))
            .is_some_and(|(service, name)| !service.is_empty() && !name.is_empty());
        if !valid {
            errors.push(ValidationError::StreamMethod(method.clone()));
        }
    }

    let rate = config.observability.sampling_rate;
    if !(0.0..=1.0).contains(&rate) {
        errors.push(ValidationError::SamplingRate(rate));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::LogFormat(other.to_string())),
    }

    if config.redis.url.trim().is_empty() {
        errors.push(ValidationError::EmptyRedisUrl);
    } else if url::Url::parse(&config.redis.url).is_err() {
        errors.push(ValidationError::InvalidRedisUrl(config.redis.url.clone()));
    }

    if config.redis.db < 0 {
        errors.push(ValidationError::NegativeDatabase(config.redis.db));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
