//! Error types for the mnpay core library
//!
//! Two layers exist. [`Error`] covers everything that can go wrong while a
//! client is being configured or a request is being assembled, before any
//! byte reaches the network. Failures of an actual provider call are reported
//! as [`ErrorEnvelope`](crate::http::ErrorEnvelope) instead.

use thiserror::Error;

/// Main error type for configuration and request construction
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (missing credentials, bad option values)
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A URL could not be parsed or joined
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        url: String,
        message: String,
    },

    /// HTTP request building errors
    #[error("HTTP request error: {message}")]
    HttpRequest {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// TLS material could not be loaded
    #[error("TLS configuration error: {message}")]
    Tls {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// JSON parsing and serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error without an underlying cause
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Create a request-building error without an underlying cause
    pub fn request(message: impl Into<String>) -> Self {
        Self::HttpRequest {
            message: message.into(),
            source: None,
        }
    }

    /// Report a credential that the provider client needs but was not configured
    pub fn missing_credential(name: &str) -> Self {
        Self::config(format!("missing credential '{}'", name))
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Json {
            message: source.to_string(),
            source,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: String::new(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = Error::config("endpoint must not be empty");
        assert_eq!(
            err.to_string(),
            "Configuration error: endpoint must not be empty"
        );
    }

    #[test]
    fn test_missing_credential_names_the_key() {
        let err = Error::missing_credential("password");
        assert!(err.to_string().contains("'password'"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Json { .. }));
    }
}
