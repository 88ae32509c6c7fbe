//! Error types and handling for the CLI

use mnpay_core::{ErrorEnvelope, ErrorKind};
use std::io;
use std::path::PathBuf;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error from mnpay-core (configuration, TLS, request assembly)
    #[error("Core error: {0}")]
    Core(#[from] mnpay_core::Error),

    /// A provider call failed after classification
    #[error("{0}")]
    Provider(#[from] ErrorEnvelope),

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Invalid file format for {}: expected {} format", path.display(), expected)]
    InvalidFormat { path: PathBuf, expected: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Provider '{}' is not configured", name)]
    ProviderNotFound { name: String },

    /// Checksum did not match the fields
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{message}")]
    Other { message: String },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            Self::Core(_) => 2,
            Self::FileNotFound { .. } => 3,
            Self::InvalidFormat { .. } => 4,
            Self::Config(_) => 5,
            Self::InvalidArgs(_) => 6,
            Self::ProviderNotFound { .. } => 7,
            Self::ChecksumMismatch => 8,
            Self::Provider(envelope) => provider_exit_code(envelope.kind()),
            Self::Json(_) => 12,
            Self::Yaml(_) => 13,
            Self::Other { .. } => 99,
        }
    }

    /// Check if this error should display usage help
    pub fn should_show_help(&self) -> bool {
        matches!(self, Self::InvalidArgs(_))
    }
}

fn provider_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidRequest => 20,
        ErrorKind::Unauthorized => 21,
        ErrorKind::NetworkError => 22,
        ErrorKind::Timeout => 23,
        ErrorKind::ProviderError => 24,
        ErrorKind::ProviderUnavailable => 25,
        ErrorKind::PaymentFailed => 26,
        ErrorKind::InternalError => 27,
    }
}

/// Format an error for display to the user
pub fn format_error(error: &Error, use_color: bool) -> String {
    if use_color {
        use colored::Colorize;
        format!("{} {}", "Error:".red().bold(), error)
    } else {
        format!("Error: {}", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnpay_core::http::Outcome;
    use mnpay_core::{ErrorClassifier, RawResponse};
    use serde_json::json;

    #[test]
    fn test_provider_errors_exit_by_kind() {
        let response = RawResponse::from_json(503, &json!({"message": "down"}));
        let envelope = ErrorClassifier::new("qpay").classify(&Outcome::Response(&response));
        let error = Error::from(envelope);

        assert_eq!(error.exit_code(), 25);
        let text = format_error(&error, false);
        assert!(text.starts_with("Error: PROVIDER_UNAVAILABLE from qpay"));
    }

    #[test]
    fn test_exit_codes_are_distinct_for_local_errors() {
        assert_eq!(Error::config("x").exit_code(), 5);
        assert_eq!(Error::ChecksumMismatch.exit_code(), 8);
        assert!(Error::invalid_args("x").should_show_help());
        assert!(!Error::other("x").should_show_help());
    }
}
