//! Error taxonomy and outcome classification
//!
//! Every failed provider call ends as exactly one [`ErrorEnvelope`]. The
//! mapping from what happened on the wire to an [`ErrorKind`] lives in
//! [`ErrorClassifier::classify`], which is pure and total: it performs no I/O
//! and every [`Outcome`] maps to exactly one kind.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::business::BusinessError;
use crate::http::response::RawResponse;

/// Failure kinds shared by every provider client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The provider rejected the request as malformed or unknown (400, 404)
    InvalidRequest,
    /// Credentials were missing, wrong or expired (401, 403)
    Unauthorized,
    /// No HTTP response was received
    NetworkError,
    /// A local or provider-side timeout elapsed
    Timeout,
    /// The provider refused service, e.g. rate limiting (429)
    ProviderError,
    /// The provider is down or failing (5xx)
    ProviderUnavailable,
    /// A success response carried a business-level error code
    PaymentFailed,
    /// Anything the classifier does not recognise
    InternalError,
}

impl ErrorKind {
    /// The wire name of the kind, e.g. `PAYMENT_FAILED`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ProviderError => "PROVIDER_ERROR",
            ErrorKind::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorKind::PaymentFailed => "PAYMENT_FAILED",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures below the HTTP layer, reported by a [`Transport`](crate::http::Transport)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// DNS resolution or TCP/TLS connect failed
    #[error("connection failed: {0}")]
    Connect(String),

    /// The transport's own timer fired
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The connection broke after it was established (reset, truncated body)
    #[error("transport I/O failure: {0}")]
    Io(String),

    /// The request could not be constructed locally; never retried
    #[error("request could not be built: {0}")]
    Request(String),
}

/// Classified failure of one logical provider call
///
/// Envelopes are immutable once built; the `with_*` methods consume and are
/// meant for the point of construction only.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    kind: ErrorKind,
    message: String,
    provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_code: Option<String>,
    #[serde(skip)]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    timestamp: DateTime<Utc>,
}

impl ErrorEnvelope {
    pub(crate) fn new(kind: ErrorKind, provider: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: provider.to_string(),
            request_id: None,
            status: None,
            provider_code: None,
            cause: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the provider's request or correlation id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach the error that caused this envelope
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub(crate) fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// HTTP status of the response that produced this envelope, if any
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Provider-specific error code extracted from the body, if any
    pub fn provider_code(&self) -> Option<&str> {
        self.provider_code.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Transport-class failures: no response, timeouts, 5xx and HTTP 429.
    /// These are the only failures the executor ever considers retrying.
    pub fn is_transport_class(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NetworkError | ErrorKind::Timeout | ErrorKind::ProviderUnavailable
        ) || self.status == Some(429)
    }

    /// Whether the failure was caused by a business-level error code
    pub fn is_business_failure(&self) -> bool {
        self.provider_code.is_some()
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}: {}", self.kind, self.provider, self.message)?;
        if let Some(request_id) = &self.request_id {
            write!(f, " (request id {})", request_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorEnvelope {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Everything that can end one attempt of a provider call
#[derive(Debug)]
pub enum Outcome<'a> {
    /// The transport failed before a full response arrived
    Transport(&'a TransportError),
    /// The local per-attempt timer or the call deadline fired
    TimedOut(Duration),
    /// The caller cancelled the call
    Cancelled,
    /// A complete HTTP response arrived
    Response(&'a RawResponse),
    /// A complete response whose body carries a provider error code
    Business {
        response: &'a RawResponse,
        error: &'a BusinessError,
    },
    /// The request could not be assembled locally
    Local(&'a crate::Error),
}

/// Maps outcomes to envelopes on behalf of one provider
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    provider: Arc<str>,
}

impl ErrorClassifier {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: Arc::from(provider.into()),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Classify an outcome into an envelope
    pub fn classify(&self, outcome: &Outcome<'_>) -> ErrorEnvelope {
        match outcome {
            Outcome::Transport(error) => {
                let kind = match error {
                    TransportError::Connect(_) | TransportError::Io(_) => ErrorKind::NetworkError,
                    TransportError::Timeout(_) => ErrorKind::Timeout,
                    TransportError::Request(_) => ErrorKind::InternalError,
                };
                ErrorEnvelope::new(kind, &self.provider, error.to_string())
                    .with_cause((*error).clone())
            }
            Outcome::TimedOut(limit) => ErrorEnvelope::new(
                ErrorKind::Timeout,
                &self.provider,
                format!("Request timed out after {} ms", limit.as_millis()),
            ),
            Outcome::Cancelled => ErrorEnvelope::new(
                ErrorKind::Timeout,
                &self.provider,
                "Request cancelled before completion",
            ),
            Outcome::Response(response) => self.classify_status(response, None),
            Outcome::Business { response, error } => {
                if response.is_success() {
                    let mut envelope = ErrorEnvelope::new(
                        ErrorKind::PaymentFailed,
                        &self.provider,
                        error.message.clone().unwrap_or_else(|| "Payment failed".to_string()),
                    )
                    .with_status(response.status().as_u16())
                    .with_provider_code(error.code.clone());
                    if let Some(request_id) = response.request_id().or_else(|| error.reference.clone()) {
                        envelope = envelope.with_request_id(request_id);
                    }
                    envelope
                } else {
                    self.classify_status(response, Some(*error))
                }
            }
            Outcome::Local(error) => ErrorEnvelope::new(
                ErrorKind::InternalError,
                &self.provider,
                error.to_string(),
            ),
        }
    }

    /// Envelope for a business failure the adapter found in a parsed body
    pub fn business_failure(
        &self,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> ErrorEnvelope {
        ErrorEnvelope::new(ErrorKind::PaymentFailed, &self.provider, message)
            .with_provider_code(code)
    }

    /// Envelope for input the adapter refuses before sending anything
    pub fn invalid_request(&self, message: impl Into<String>) -> ErrorEnvelope {
        ErrorEnvelope::new(ErrorKind::InvalidRequest, &self.provider, message)
    }

    /// Envelope for a success response whose body could not be understood
    pub fn invalid_response(&self, message: impl Into<String>) -> ErrorEnvelope {
        ErrorEnvelope::new(ErrorKind::InternalError, &self.provider, message)
    }

    fn classify_status(
        &self,
        response: &RawResponse,
        business: Option<&BusinessError>,
    ) -> ErrorEnvelope {
        let status = response.status().as_u16();
        let (kind, generic) = match status {
            400 => (ErrorKind::InvalidRequest, "Invalid request".to_string()),
            404 => (ErrorKind::InvalidRequest, "Resource not found".to_string()),
            401 | 403 => (ErrorKind::Unauthorized, "Unauthorized access".to_string()),
            408 => (ErrorKind::Timeout, "Request timed out".to_string()),
            429 => (ErrorKind::ProviderError, "Too many requests".to_string()),
            500..=599 => (
                ErrorKind::ProviderUnavailable,
                "Payment provider is currently unavailable".to_string(),
            ),
            other => (
                ErrorKind::InternalError,
                format!("Unexpected HTTP status {}", other),
            ),
        };

        let message = business
            .and_then(|b| b.message.clone())
            .or_else(|| body_message(response))
            .unwrap_or(generic);

        let mut envelope = ErrorEnvelope::new(kind, &self.provider, message).with_status(status);
        if let Some(business) = business {
            envelope = envelope.with_provider_code(business.code.clone());
        }
        let reference = business.and_then(|b| b.reference.clone());
        if let Some(request_id) = response.request_id().or(reference) {
            envelope = envelope.with_request_id(request_id);
        }
        envelope
    }
}

/// `body.message`, then `body.error`, when they are non-empty strings
fn body_message(response: &RawResponse) -> Option<String> {
    let body = response.json_value()?;
    ["message", "error"].iter().find_map(|field| match body.get(*field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::StatusCode;
    use serde_json::json;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new("golomt")
    }

    fn kind_for_status(status: u16) -> ErrorKind {
        let response = RawResponse::from_json(status, &json!({}));
        classifier().classify(&Outcome::Response(&response)).kind()
    }

    #[test]
    fn test_status_table() {
        assert_eq!(kind_for_status(400), ErrorKind::InvalidRequest);
        assert_eq!(kind_for_status(404), ErrorKind::InvalidRequest);
        assert_eq!(kind_for_status(401), ErrorKind::Unauthorized);
        assert_eq!(kind_for_status(403), ErrorKind::Unauthorized);
        assert_eq!(kind_for_status(408), ErrorKind::Timeout);
        assert_eq!(kind_for_status(429), ErrorKind::ProviderError);
        assert_eq!(kind_for_status(500), ErrorKind::ProviderUnavailable);
        assert_eq!(kind_for_status(503), ErrorKind::ProviderUnavailable);
        assert_eq!(kind_for_status(599), ErrorKind::ProviderUnavailable);
        assert_eq!(kind_for_status(409), ErrorKind::InternalError);
        assert_eq!(kind_for_status(302), ErrorKind::InternalError);
    }

    #[test]
    fn test_message_preference() {
        let c = classifier();

        let both = RawResponse::from_json(400, &json!({"message": "bad amount", "error": "E1"}));
        assert_eq!(c.classify(&Outcome::Response(&both)).message(), "bad amount");

        let error_only = RawResponse::from_json(401, &json!({"error": "invalid_token"}));
        assert_eq!(c.classify(&Outcome::Response(&error_only)).message(), "invalid_token");

        let nested = RawResponse::from_json(503, &json!({"error": {"code": 1}}));
        assert_eq!(
            c.classify(&Outcome::Response(&nested)).message(),
            "Payment provider is currently unavailable"
        );

        let not_json = RawResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), "<html/>");
        assert_eq!(c.classify(&Outcome::Response(&not_json)).message(), "Resource not found");
    }

    #[test]
    fn test_transport_failures() {
        let c = classifier();
        let connect = TransportError::Connect("dns failure".into());
        let envelope = c.classify(&Outcome::Transport(&connect));
        assert_eq!(envelope.kind(), ErrorKind::NetworkError);
        assert!(std::error::Error::source(&envelope).is_some());

        let reset = TransportError::Io("connection reset".into());
        assert_eq!(c.classify(&Outcome::Transport(&reset)).kind(), ErrorKind::NetworkError);

        let timeout = TransportError::Timeout("read".into());
        assert_eq!(c.classify(&Outcome::Transport(&timeout)).kind(), ErrorKind::Timeout);

        let local = TransportError::Request("bad header".into());
        assert_eq!(c.classify(&Outcome::Transport(&local)).kind(), ErrorKind::InternalError);

        assert_eq!(
            c.classify(&Outcome::TimedOut(Duration::from_secs(30))).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(c.classify(&Outcome::Cancelled).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_business_error_on_success_is_payment_failed() {
        let response = RawResponse::from_json(200, &json!({"errorCode": "005"}));
        let error = BusinessError::new("005", Some("insufficient".into())).with_reference("TX-1");
        let envelope = classifier().classify(&Outcome::Business {
            response: &response,
            error: &error,
        });
        assert_eq!(envelope.kind(), ErrorKind::PaymentFailed);
        assert_eq!(envelope.message(), "insufficient");
        assert_eq!(envelope.provider_code(), Some("005"));
        assert_eq!(envelope.request_id(), Some("TX-1"));
        assert!(envelope.is_business_failure());
        assert!(!envelope.is_transport_class());
    }

    #[test]
    fn test_business_error_on_failure_status_keeps_status_kind() {
        let response = RawResponse::from_json(502, &json!({"ErrorCode": "7"}));
        let error = BusinessError::new("7", None);
        let envelope = classifier().classify(&Outcome::Business {
            response: &response,
            error: &error,
        });
        assert_eq!(envelope.kind(), ErrorKind::ProviderUnavailable);
        assert!(envelope.is_business_failure());
    }

    #[test]
    fn test_request_id_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("req-42"));
        let response = RawResponse::new(StatusCode::FORBIDDEN, headers, Vec::new());
        let envelope = classifier().classify(&Outcome::Response(&response));
        assert_eq!(envelope.request_id(), Some("req-42"));
        assert_eq!(envelope.status(), Some(403));
    }

    #[test]
    fn test_transport_class() {
        assert!(!classifier().invalid_request("x").is_transport_class());
        let too_many = RawResponse::from_json(429, &json!({}));
        assert!(classifier()
            .classify(&Outcome::Response(&too_many))
            .is_transport_class());
    }

    #[test]
    fn test_envelope_serializes_kind_as_wire_name() {
        let envelope = classifier()
            .business_failure("005", "insufficient")
            .with_request_id("TX-1");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["kind"], "PAYMENT_FAILED");
        assert_eq!(value["provider"], "golomt");
        assert_eq!(value["request_id"], "TX-1");
        assert_eq!(
            envelope.to_string(),
            "PAYMENT_FAILED from golomt: insufficient (request id TX-1)"
        );
    }
}
