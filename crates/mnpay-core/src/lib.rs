//! mnpay core - resilient, authenticated request execution for payment providers
//!
//! Every provider client in the workspace follows the same pattern: build a
//! signed or authenticated request, send it with bounded retries, classify the
//! outcome into one shared error taxonomy and, for several providers, cache a
//! short-lived bearer token. This crate implements that pattern once.
//!
//! # Main Components
//!
//! - **SignatureSigner**: HMAC-SHA256 over ordered field lists, plus
//!   constant-time callback verification
//! - **ErrorClassifier**: maps transport, HTTP and business outcomes to an
//!   [`ErrorEnvelope`]
//! - **RequestExecutor**: timeout, linear-backoff retry and business-error
//!   detection around a pluggable [`Transport`](http::Transport)
//! - **CredentialCache**: expiry-aware token cache with single-flight refresh
//! - **ProviderClient**: runs [`ProviderOperation`]s for one configured provider
//!
//! # Example
//!
//! ```no_run
//! use mnpay_core::{ClientAuth, ClientConfig, ProviderClient};
//! use mnpay_core::http::BasicAuth;
//! use std::sync::Arc;
//!
//! fn client() -> mnpay_core::Result<ProviderClient> {
//!     let config = ClientConfig::new("https://api.example.mn")
//!         .with_credential("username", "${ENV:EXAMPLE_USERNAME}")
//!         .with_credential("password", "${ENV:EXAMPLE_PASSWORD}");
//!     let auth = BasicAuth::new(config.credential("username")?, config.credential("password")?);
//!     Ok(ProviderClient::new("example", config)?.with_auth(ClientAuth::Static(Arc::new(auth))))
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod signer;

pub use adapter::{parse_json, ClientAuth, Endpoint, Parsed, ProviderClient, ProviderOperation};
pub use config::ClientConfig;
pub use credential::{
    Clock, Credential, CredentialCache, CredentialCacheBuilder, ManualClock, SystemClock,
    TokenSource, DEFAULT_MARGIN,
};
pub use error::{Error, Result};
pub use http::{ErrorClassifier, ErrorEnvelope, ErrorKind, RawResponse, RequestExecutor, RequestSpec, RetryPolicy};
pub use signer::{append_as_string, random_reference, SignatureSigner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
