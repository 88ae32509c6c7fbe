//! The contract between provider adapters and the execution core
//!
//! An adapter describes each domain operation as a [`ProviderOperation`]:
//! where it goes, how the request is filled in, and how the response is read.
//! [`ProviderClient::call`] does the rest (authentication, retry,
//! classification and token invalidation) the same way for every provider.

use std::borrow::Cow;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::credential::CredentialCache;
use crate::http::{
    AuthHandler, BusinessErrorDetector, ErrorClassifier, ErrorEnvelope, ErrorKind, Method,
    Outcome, RawResponse, ReqwestTransport, RequestExecutor, RequestSpec, RequestSpecBuilder,
    RetryPolicy, Transport,
};

/// Method and path of an operation, relative to the client endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    pub path: &'static str,
}

impl Endpoint {
    pub const fn new(method: Method, path: &'static str) -> Self {
        Self { method, path }
    }

    pub const fn get(path: &'static str) -> Self {
        Self::new(Method::GET, path)
    }

    pub const fn post(path: &'static str) -> Self {
        Self::new(Method::POST, path)
    }

    pub const fn delete(path: &'static str) -> Self {
        Self::new(Method::DELETE, path)
    }
}

/// Result of reading a provider response
#[derive(Debug)]
pub enum Parsed<T> {
    /// The operation succeeded
    Ok(T),
    /// The provider understood the request and refused it
    BusinessError(ErrorEnvelope),
    /// The response could not be used at all
    TransportError(ErrorEnvelope),
}

impl<T> Parsed<T> {
    pub fn into_result(self) -> Result<T, ErrorEnvelope> {
        match self {
            Parsed::Ok(value) => Ok(value),
            Parsed::BusinessError(envelope) | Parsed::TransportError(envelope) => Err(envelope),
        }
    }

    /// Deserialize the body, reporting failure as an unusable response
    pub fn json(response: &RawResponse, classifier: &ErrorClassifier) -> Self
    where
        T: DeserializeOwned,
    {
        match parse_json(response, classifier) {
            Ok(value) => Parsed::Ok(value),
            Err(envelope) => Parsed::TransportError(envelope),
        }
    }
}

/// Deserialize a response body; failure is an INTERNAL_ERROR envelope
pub fn parse_json<T: DeserializeOwned>(
    response: &RawResponse,
    classifier: &ErrorClassifier,
) -> Result<T, ErrorEnvelope> {
    response.json().map_err(|e| {
        let envelope = classifier
            .invalid_response(format!("unexpected response body: {}", e))
            .with_cause(e);
        match response.request_id() {
            Some(id) => envelope.with_request_id(id),
            None => envelope,
        }
    })
}

/// One domain operation of a provider API
pub trait ProviderOperation: Send + Sync {
    type Output;

    fn endpoint(&self) -> Endpoint;

    /// Path for this call; defaults to the endpoint path. Override to append
    /// identifiers such as `/invoice/{id}`.
    fn path(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.endpoint().path)
    }

    /// Fill in body, query and signature fields
    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> crate::Result<RequestSpecBuilder> {
        Ok(request)
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Self::Output>;

    /// Retry policy for this operation, if it differs from the client's
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    fn requires_auth(&self) -> bool {
        true
    }
}

/// How a client authenticates its calls
#[derive(Debug, Clone, Default)]
pub enum ClientAuth {
    #[default]
    None,
    /// Credentials that never change: Basic, static bearer, API-key headers
    Static(Arc<dyn AuthHandler>),
    /// A bearer token obtained from the provider and cached
    Cached(CredentialCache),
}

/// A configured client for one provider
#[derive(Debug, Clone)]
pub struct ProviderClient {
    config: ClientConfig,
    executor: RequestExecutor,
    policy: RetryPolicy,
    auth: ClientAuth,
}

impl ProviderClient {
    /// Client talking to the network through reqwest
    pub fn new(provider: &str, config: ClientConfig) -> crate::Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config.transport_config())?;
        Self::with_transport(provider, config, Arc::new(transport))
    }

    /// Client using a caller-supplied transport
    pub fn with_transport(
        provider: &str,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> crate::Result<Self> {
        config.validate()?;
        let policy = config.retry_policy();
        Ok(Self {
            executor: RequestExecutor::new(provider, transport),
            config,
            policy,
            auth: ClientAuth::None,
        })
    }

    pub fn with_auth(mut self, auth: ClientAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_detector<D>(mut self, detector: D) -> Self
    where
        D: BusinessErrorDetector + 'static,
    {
        self.executor = self.executor.with_detector(detector);
        self
    }

    /// Default retry policy for operations that do not override it
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        self.executor.classifier()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn auth(&self) -> &ClientAuth {
        &self.auth
    }

    pub fn credential_cache(&self) -> Option<&CredentialCache> {
        match &self.auth {
            ClientAuth::Cached(cache) => Some(cache),
            _ => None,
        }
    }

    /// Run one operation: authenticate, build, execute with retry, parse
    pub async fn call<O>(&self, operation: &O) -> Result<O::Output, ErrorEnvelope>
    where
        O: ProviderOperation,
    {
        let classifier = self.classifier();
        let endpoint = operation.endpoint();
        let url = self.config.url(&operation.path());
        let mut builder = RequestSpec::builder(endpoint.method, &url).timeout(self.config.timeout());

        let mut token_used = None;
        if operation.requires_auth() {
            match &self.auth {
                ClientAuth::None => {}
                ClientAuth::Static(handler) => builder = builder.auth(handler.as_ref()),
                ClientAuth::Cached(cache) => {
                    let credential = cache.get_valid_token().await?;
                    builder = builder.bearer(credential.access_token());
                    token_used = Some(credential.access_token().to_string());
                }
            }
        }

        let spec = operation
            .prepare(builder, &self.config)
            .and_then(RequestSpecBuilder::build)
            .map_err(|e| classifier.classify(&Outcome::Local(&e)))?;

        let policy = operation.retry_policy();
        let result = match self
            .executor
            .execute(&spec, policy.as_ref().unwrap_or(&self.policy))
            .await
        {
            Ok(response) => operation.parse(response, classifier).into_result(),
            Err(envelope) => Err(envelope),
        };

        if let (Err(envelope), Some(token), ClientAuth::Cached(cache)) =
            (&result, &token_used, &self.auth)
        {
            if envelope.kind() == ErrorKind::Unauthorized {
                cache.invalidate_token(token);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, TokenSource};
    use crate::http::executor::tests::{status, ScriptedTransport, Step};
    use crate::http::BearerAuth;
    use chrono::{DateTime, Utc};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Invoice {
        invoice_id: String,
    }

    struct GetInvoice {
        id: String,
        retry: Option<RetryPolicy>,
    }

    impl GetInvoice {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                retry: None,
            }
        }
    }

    impl ProviderOperation for GetInvoice {
        type Output = Invoice;

        fn endpoint(&self) -> Endpoint {
            Endpoint::get("/invoice")
        }

        fn path(&self) -> Cow<'_, str> {
            Cow::Owned(format!("/invoice/{}", self.id))
        }

        fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Invoice> {
            let body = response.json_value().unwrap_or_default();
            if body["status"] == "CANCELLED" {
                return Parsed::BusinessError(
                    classifier.business_failure("CANCELLED", "invoice was cancelled"),
                );
            }
            Parsed::json(&response, classifier)
        }

        fn retry_policy(&self) -> Option<RetryPolicy> {
            self.retry.clone()
        }
    }

    struct FixedTokens;

    impl TokenSource for FixedTokens {
        fn token_request(
            &self,
            _previous: Option<&Credential>,
            _now: DateTime<Utc>,
        ) -> crate::Result<RequestSpec> {
            RequestSpec::post("https://api.example.mn/auth/token").build()
        }

        fn parse_token(
            &self,
            response: &RawResponse,
            now: DateTime<Utc>,
            classifier: &ErrorClassifier,
        ) -> Result<Credential, ErrorEnvelope> {
            #[derive(Deserialize)]
            struct Token {
                access_token: String,
            }
            let token: Token = parse_json(response, classifier)?;
            Ok(Credential::new(token.access_token, now + chrono::Duration::hours(1)))
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("https://api.example.mn/v2")
    }

    fn ok_invoice() -> Step {
        Step::Respond(RawResponse::from_json(200, &json!({"invoice_id": "INV-1"})))
    }

    fn token(name: &str) -> Step {
        Step::Respond(RawResponse::from_json(200, &json!({"access_token": name})))
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_static_auth() {
        let transport = ScriptedTransport::new(vec![ok_invoice()]);
        let client = ProviderClient::with_transport("testpay", config(), transport.clone())
            .unwrap()
            .with_auth(ClientAuth::Static(Arc::new(BearerAuth::new("static-token"))));

        let invoice = client.call(&GetInvoice::new("INV-1")).await.unwrap();
        assert_eq!(invoice.invoice_id, "INV-1");

        let sent = &transport.requests()[0];
        assert_eq!(sent.url().as_str(), "https://api.example.mn/v2/invoice/INV-1");
        assert_eq!(sent.header("authorization"), Some("Bearer static-token"));
        assert_eq!(sent.timeout(), config().timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_invalidates_cached_token() {
        let transport = ScriptedTransport::new(vec![
            token("first"),
            status(401),
            token("second"),
            ok_invoice(),
        ]);
        let client = ProviderClient::with_transport("testpay", config(), transport.clone()).unwrap();
        let cache = CredentialCache::new(FixedTokens, client.executor().clone());
        let client = client.with_auth(ClientAuth::Cached(cache));

        let err = client.call(&GetInvoice::new("INV-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(client.credential_cache().unwrap().current().is_none());

        client.call(&GetInvoice::new("INV-1")).await.unwrap();
        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[1].header("authorization"), Some("Bearer first"));
        assert_eq!(requests[3].header("authorization"), Some("Bearer second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_retry_override() {
        let transport = ScriptedTransport::new(vec![status(503)]);
        let client = ProviderClient::with_transport("testpay", config(), transport.clone()).unwrap();
        let op = GetInvoice {
            id: "INV-1".into(),
            retry: Some(RetryPolicy::no_retry()),
        };
        let err = client.call(&op).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_outcomes() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond(RawResponse::from_json(200, &json!({"status": "CANCELLED"}))),
            Step::Respond(RawResponse::from_json(200, &json!({"unexpected": true}))),
        ]);
        let client = ProviderClient::with_transport("testpay", config(), transport).unwrap();

        let business = client.call(&GetInvoice::new("A")).await.unwrap_err();
        assert_eq!(business.kind(), ErrorKind::PaymentFailed);
        assert_eq!(business.provider_code(), Some("CANCELLED"));

        let malformed = client.call(&GetInvoice::new("B")).await.unwrap_err();
        assert_eq!(malformed.kind(), ErrorKind::InternalError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_build_failure_sends_nothing() {
        struct BadHeader;
        impl ProviderOperation for BadHeader {
            type Output = ();
            fn endpoint(&self) -> Endpoint {
                Endpoint::post("/x")
            }
            fn prepare(
                &self,
                request: RequestSpecBuilder,
                _config: &ClientConfig,
            ) -> crate::Result<RequestSpecBuilder> {
                Ok(request.header("bad header", "v"))
            }
            fn parse(&self, _response: RawResponse, _classifier: &ErrorClassifier) -> Parsed<()> {
                Parsed::Ok(())
            }
        }

        let transport = ScriptedTransport::new(vec![]);
        let client = ProviderClient::with_transport("testpay", config(), transport.clone()).unwrap();
        let err = client.call(&BadHeader).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let transport = ScriptedTransport::new(vec![]);
        assert!(ProviderClient::with_transport("x", ClientConfig::default(), transport).is_err());
    }
}
