//! HTTP execution layer shared by every provider client
//!
//! This module provides:
//! - Request description and building ([`RequestSpec`])
//! - Static authentication handlers
//! - Error classification into the shared taxonomy
//! - Retry with linear backoff and business-error detection
//! - The pluggable network [`Transport`] with TLS configuration

pub mod auth;
pub mod business;
pub mod error;
pub mod executor;
pub mod request;
pub mod response;
pub mod retry;
pub mod tls;
pub mod transport;

pub use auth::{expand_env_vars, AuthHandler, BasicAuth, BearerAuth, HeaderAuth};
pub use business::{BusinessError, BusinessErrorDetector, ErrorCodeRule, NoBusinessErrors};
pub use error::{ErrorClassifier, ErrorEnvelope, ErrorKind, Outcome, TransportError};
pub use executor::RequestExecutor;
pub use request::{join_url, RequestSpec, RequestSpecBuilder, DEFAULT_TIMEOUT};
pub use response::RawResponse;
pub use retry::{RetryDecision, RetryPolicy, RetryPredicate};
pub use tls::{TlsConfig, TlsConfigError};
pub use transport::{ReqwestTransport, Transport, TransportConfig};

// Re-export commonly used types
pub use reqwest::header::HeaderMap;
pub use reqwest::{Method, StatusCode};
