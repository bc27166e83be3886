use std::net::SocketAddr;

use regex::Regex;
use url::Url;

use crate::config::models::{HandlerConfig, ProxyTargetConfig, ServerConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid pattern '{pattern}' in {field}: {reason}")]
    InvalidPattern {
        field: String,
        pattern: String,
        reason: String,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator.
///
/// Collects every problem instead of stopping at the first one so a broken
/// file can be fixed in a single pass.
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_url(&config.backend.target, "backend.target") {
            errors.push(e);
        }

        if let Some(host) = &config.backend.host {
            if let Err(e) = Self::validate_host(host, "backend.host") {
                errors.push(e);
            }
        }

        if config.backend.command.is_some() && config.backend.command_port().is_none() {
            errors.push(ValidationError::InvalidField {
                field: "backend.port".to_string(),
                message: "A backend command needs a port, either set here or in backend.target"
                    .to_string(),
            });
        }

        if config.backend.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "backend.timeout_secs".to_string(),
                message: "The upstream timeout must be greater than zero".to_string(),
            });
        }

        if config.backend.chunk_size == 0 {
            errors.push(ValidationError::InvalidField {
                field: "backend.chunk_size".to_string(),
                message: "Chunk size must be greater than zero".to_string(),
            });
        }

        if config.static_files.chunk_size == 0 {
            errors.push(ValidationError::InvalidField {
                field: "static_files.chunk_size".to_string(),
                message: "Chunk size must be greater than zero".to_string(),
            });
        }

        for (i, target) in config.backend.targets.iter().enumerate() {
            errors.extend(Self::validate_proxy_target(i, target));
        }

        for (i, handler) in config.handlers.iter().enumerate() {
            errors.extend(Self::validate_handler(i, handler));
        }

        for pattern in &config.static_files.disallow {
            if let Err(e) = Self::validate_pattern(pattern, "static_files.disallow") {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8080')".to_string(),
            });
        }
        Ok(())
    }

    fn validate_url(value: &str, field: &str) -> ValidationResult<()> {
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
                Ok(())
            }
            Ok(url) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!(
                    "URL '{value}' must use http or https and name a host (got scheme '{}')",
                    url.scheme()
                ),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("'{value}' is not a valid URL: {e}"),
            }),
        }
    }

    fn validate_pattern(pattern: &str, field: &str) -> ValidationResult<()> {
        Regex::new(pattern)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidPattern {
                field: field.to_string(),
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    fn validate_host(host: &str, field: &str) -> ValidationResult<()> {
        if host.is_empty() || http::HeaderValue::from_str(host).is_err() {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("'{host}' is not a usable Host header value"),
            });
        }
        Ok(())
    }

    fn validate_proxy_target(index: usize, target: &ProxyTargetConfig) -> Vec<ValidationError> {
        let field = format!("backend.targets[{index}]");
        let mut errors = Vec::new();

        if !target.prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.prefix"),
                message: format!("Prefix '{}' must start with '/'", target.prefix),
            });
        }

        if let Err(e) = Self::validate_url(&target.target, &format!("{field}.target")) {
            errors.push(e);
        }

        if let Some(host) = &target.host {
            if let Err(e) = Self::validate_host(host, &format!("{field}.host")) {
                errors.push(e);
            }
        }

        for (name, value) in &target.headers {
            if http::HeaderName::from_bytes(name.as_bytes()).is_err()
                || http::HeaderValue::from_str(value).is_err()
            {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field}.headers"),
                    message: format!("'{name}: {value}' is not a valid header"),
                });
            }
        }

        errors
    }

    fn validate_handler(index: usize, handler: &HandlerConfig) -> Vec<ValidationError> {
        let field = format!("handlers[{index}]");
        let mut errors = Vec::new();

        if !handler.url.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.url"),
                message: format!("URL pattern '{}' must start with '/'", handler.url),
            });
        }

        match (&handler.static_dir, &handler.static_files) {
            (Some(_), Some(_)) => errors.push(ValidationError::InvalidField {
                field: field.clone(),
                message: "A handler cannot declare both static_dir and static_files".to_string(),
            }),
            (Some(_), None) | (None, Some(_)) => {
                if let Err(e) = Self::validate_pattern(&handler.url, &format!("{field}.url")) {
                    errors.push(e);
                }
            }
            (None, None) => {}
        }

        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let mut message = format!("{} configuration error(s) found:", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("\n  {}. {}", i + 1, error));
        }
        message
    }
}
