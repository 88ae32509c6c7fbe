//! The network boundary: one request in, one fully-read response out
//!
//! The executor only ever talks to a [`Transport`], so retry, timeout and
//! classification logic can be exercised with a scripted transport in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::http::error::TransportError;
use crate::http::request::RequestSpec;
use crate::http::response::RawResponse;
use crate::http::tls::TlsConfig;
use crate::{Error, Result};

/// Sends a single physical request
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestSpec) -> std::result::Result<RawResponse, TransportError>;
}

/// Connection-level settings for [`ReqwestTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Time to establish a connection
    pub connect_timeout: Duration,
    /// Fallback timeout for the whole request; each request also carries its own
    pub request_timeout: Duration,
    /// Keep-alive timeout for idle pooled connections
    pub pool_idle_timeout: Option<Duration>,
    pub user_agent: String,
    pub tls: TlsConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            user_agent: format!("mnpay/{}", env!("CARGO_PKG_VERSION")),
            tls: TlsConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Validate timeout configuration
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout cannot be zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config("request timeout cannot be zero"));
        }
        if self.request_timeout < self.connect_timeout {
            return Err(Error::config("request timeout should be >= connect timeout"));
        }
        Ok(())
    }
}

/// [`Transport`] backed by a pooled `reqwest` client using rustls
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        config.validate()?;

        let builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .user_agent(config.user_agent.clone());
        let client = config
            .tls
            .apply(builder)?
            .build()
            .map_err(|e| Error::HttpRequest {
                message: format!("failed to create HTTP client: {}", e),
                source: Some(Box::new(e)),
            })?;

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestSpec) -> std::result::Result<RawResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone())
            .timeout(request.timeout());
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(RawResponse::new(status, headers, body.to_vec()))
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    let message = error.to_string();
    if error.is_timeout() {
        TransportError::Timeout(message)
    } else if error.is_connect() {
        TransportError::Connect(message)
    } else if error.is_builder() {
        TransportError::Request(message)
    } else {
        TransportError::Io(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.user_agent.starts_with("mnpay/"));
    }

    #[test]
    fn test_invalid_timeouts() {
        let config = TransportConfig {
            connect_timeout: Duration::ZERO,
            ..TransportConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TransportConfig {
            connect_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(5),
            ..TransportConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_sends_request_and_reads_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/invoice")
            .match_header("content-type", "application/json")
            .match_body(r#"{"amount":100}"#)
            .with_status(201)
            .with_header("x-request-id", "r-1")
            .with_body(r#"{"invoice_id":"INV-1"}"#)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(&TransportConfig::default()).unwrap();
        let spec = RequestSpec::post(&format!("{}/invoice", server.url()))
            .json(&serde_json::json!({"amount": 100}))
            .build()
            .unwrap();
        let response = transport.send(&spec).await.unwrap();

        assert_eq!(response.status().as_u16(), 201);
        assert_eq!(response.request_id().as_deref(), Some("r-1"));
        assert_eq!(response.json_value().unwrap()["invoice_id"], "INV-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_failure_is_classified_as_connect() {
        let transport = ReqwestTransport::new(&TransportConfig::default()).unwrap();
        // Port 9 on localhost is the discard service and is normally closed.
        let spec = RequestSpec::get("http://127.0.0.1:9/").build().unwrap();
        let err = transport.send(&spec).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{:?}", err);
    }
}
