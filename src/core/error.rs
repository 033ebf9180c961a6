// src/core/error.rs

use std::time::Duration;
use thiserror::Error;

/// Rejected client configuration. Raised only at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("timeout must be greater than zero, got {0:?}")]
    InvalidTimeout(Duration),

    #[error("invalid duration for `{field}`: {value} (must be finite and non-negative)")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("pool bounds must be at least 1 (max_total={max_total}, max_per_route={max_per_route})")]
    InvalidPoolBounds { max_total: usize, max_per_route: usize },

    #[error("invalid proxy `{url}`: {reason}")]
    InvalidProxy { url: String, reason: String },

    #[error("identity `{0}` is not a usable User-Agent value")]
    InvalidIdentity(String),
}

/// Errors raised while building an `HttpClient`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialize HTTP transport: {0}")]
    TransportInit(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_convert_into_client_errors() {
        let err: ClientError = ConfigError::InvalidTimeout(Duration::ZERO).into();
        assert!(matches!(err, ClientError::Config(_)));
        assert!(err.to_string().contains("timeout must be greater than zero"));
    }
}
