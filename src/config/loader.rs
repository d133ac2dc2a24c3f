//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BatchPolicy;

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.rpc.port, 50051);
        assert_eq!(config.http.port, 8080);
        assert!(config.rpc.tracing_enabled);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = parse_config(
            r#"
            [rpc]
            port = 7000
            stream_methods = ["/demo.Feed/Watch"]

            [redis]
            batch_policy = "stop_on_error"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.rpc.port, 7000);
        assert_eq!(config.rpc.stream_methods, vec!["/demo.Feed/Watch"]);
        assert_eq!(config.redis.batch_policy, BatchPolicy::StopOnError);
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = parse_config("[observability]\nsampling_rate = 2.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("sampling_rate"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/servicekit.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
