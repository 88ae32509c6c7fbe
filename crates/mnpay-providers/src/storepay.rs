//! Storepay buy-now-pay-later merchant API
//!
//! Tokens come from an OAuth2 password grant: the app credentials travel in
//! the query string and the merchant user authenticates with Basic auth.
//! `expires_in` is relative. Every business response carries
//! `status: "Success"` or a `msgList` explaining the refusal.
//!
//! Config credentials: `app_username`, `app_password`, `username`,
//! `password`, `store_id` and optionally `auth_url` when tokens are issued by
//! a different host than `endpoint`.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mnpay_core::http::{join_url, BasicAuth, BusinessError, RequestSpecBuilder, Transport};
use mnpay_core::{
    parse_json, ClientAuth, ClientConfig, Credential, CredentialCache, Endpoint, ErrorClassifier,
    ErrorEnvelope, Parsed, ProviderClient, ProviderOperation, RawResponse, RequestSpec,
    RetryPolicy, TokenSource, DEFAULT_MARGIN,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::wire;

pub const PROVIDER: &str = "storepay";

pub const AUTH: Endpoint = Endpoint::post("/oauth/token");
pub const LOAN: Endpoint = Endpoint::post("/merchant/loan");
pub const LOAN_CHECK: Endpoint = Endpoint::get("/merchant/loan/check/");
pub const USER_POSSIBLE_AMOUNT: Endpoint = Endpoint::post("/user/possibleAmount");

const SUCCESS_STATUS: &str = "Success";

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub text: Option<String>,
}

/// The `{value, msgList, status}` wrapper around every business response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply<T> {
    pub value: T,
    #[serde(default)]
    pub msg_list: Vec<Message>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Bodies with a `status` other than `Success` are refusals. Token responses
/// carry no `status` and pass through.
pub fn detect_refusal(response: &RawResponse) -> Option<BusinessError> {
    let body = response.json_value()?;
    let status = body.get("status")?.as_str()?;
    if status == SUCCESS_STATUS {
        return None;
    }

    let first: Option<Message> = body
        .get("msgList")
        .and_then(|list| list.get(0))
        .and_then(|message| serde_json::from_value(message.clone()).ok());
    let (code, text) = match first {
        Some(Message { code, text }) => (code.unwrap_or_else(|| status.to_string()), text),
        None => (status.to_string(), None),
    };
    let message = match text {
        Some(text) => format!("{}: {} - {}", status, code, text),
        None => format!("{}: {}", status, code),
    };
    tracing::debug!(provider = PROVIDER, code = %code, "business refusal");
    Some(BusinessError::new(code, Some(message)))
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

/// Issues Storepay bearer tokens through the password grant
#[derive(Debug)]
pub struct StorepayTokens {
    token_url: String,
    app_username: String,
    app_password: String,
    auth: BasicAuth,
    timeout: std::time::Duration,
}

impl StorepayTokens {
    pub fn from_config(config: &ClientConfig) -> mnpay_core::Result<Self> {
        let auth_base = config
            .optional_credential("auth_url")?
            .unwrap_or_else(|| config.endpoint.clone());
        Ok(Self {
            token_url: join_url(&auth_base, AUTH.path),
            app_username: config.credential("app_username")?,
            app_password: config.credential("app_password")?,
            auth: BasicAuth::new(config.credential("username")?, config.credential("password")?),
            timeout: config.timeout(),
        })
    }
}

impl TokenSource for StorepayTokens {
    fn token_request(
        &self,
        _previous: Option<&Credential>,
        _now: DateTime<Utc>,
    ) -> mnpay_core::Result<RequestSpec> {
        RequestSpec::post(&self.token_url)
            .query(&[
                ("grant_type", "password"),
                ("username", self.app_username.as_str()),
                ("password", self.app_password.as_str()),
            ])
            .auth(&self.auth)
            .timeout(self.timeout)
            .build()
    }

    fn parse_token(
        &self,
        response: &RawResponse,
        now: DateTime<Utc>,
        classifier: &ErrorClassifier,
    ) -> Result<Credential, ErrorEnvelope> {
        let login: LoginResponse = parse_json(response, classifier)?;
        let mut credential =
            Credential::new(login.access_token, now + chrono::Duration::seconds(login.expires_in));
        if let Some(refresh_token) = login.refresh_token {
            credential = credential.with_refresh_token(refresh_token, None);
        }
        if let Some(scope) = login.scope {
            credential = credential.with_scope(scope);
        }
        Ok(credential)
    }
}

fn parse_value<T: DeserializeOwned>(response: &RawResponse, classifier: &ErrorClassifier) -> Parsed<T> {
    match parse_json::<Reply<T>>(response, classifier) {
        Ok(reply) => Parsed::Ok(reply.value),
        Err(envelope) => Parsed::TransportError(envelope),
    }
}

/// Request a loan for a customer; the value is the loan id
#[derive(Debug, Clone)]
pub struct Loan {
    pub mobile_number: String,
    pub description: String,
    pub amount: f64,
}

impl ProviderOperation for Loan {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        LOAN
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&serde_json::json!({
            "storeId": config.credential("store_id")?,
            "mobileNumber": self.mobile_number,
            "description": self.description,
            "amount": self.amount.to_string(),
            "callbackUrl": config.callback_url.clone().unwrap_or_default(),
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Value> {
        parse_value(&response, classifier)
    }

    // A replayed request would disburse a second loan.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::no_retry())
    }
}

/// Whether a loan has been confirmed by the customer
#[derive(Debug, Clone)]
pub struct LoanCheck {
    pub loan_id: String,
}

impl ProviderOperation for LoanCheck {
    type Output = bool;

    fn endpoint(&self) -> Endpoint {
        LOAN_CHECK
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", LOAN_CHECK.path, self.loan_id))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<bool> {
        parse_value(&response, classifier)
    }
}

/// Maximum amount a customer may borrow
#[derive(Debug, Clone)]
pub struct PossibleAmount {
    pub mobile_number: String,
}

impl ProviderOperation for PossibleAmount {
    type Output = f64;

    fn endpoint(&self) -> Endpoint {
        USER_POSSIBLE_AMOUNT
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&serde_json::json!({ "mobileNumber": self.mobile_number })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<f64> {
        parse_value(&response, classifier)
    }
}

/// Storepay client with a cached password-grant token
#[derive(Debug, Clone)]
pub struct StorepayClient {
    client: ProviderClient,
}

impl StorepayClient {
    pub fn new(config: ClientConfig) -> mnpay_core::Result<Self> {
        Self::from_client(ProviderClient::new(PROVIDER, config)?)
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> mnpay_core::Result<Self> {
        Self::from_client(ProviderClient::with_transport(PROVIDER, config, transport)?)
    }

    fn from_client(client: ProviderClient) -> mnpay_core::Result<Self> {
        let client = client.with_detector(detect_refusal);
        let config = client.config();
        config.credential("store_id")?;
        let tokens = StorepayTokens::from_config(config)?;
        let cache = CredentialCache::builder(tokens, client.executor().clone())
            .margin(config.token_margin(DEFAULT_MARGIN))
            .retry_policy(client.retry_policy().clone())
            .build();
        Ok(Self {
            client: client.with_auth(ClientAuth::Cached(cache)),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    pub async fn token(&self) -> Result<Credential, ErrorEnvelope> {
        match self.client.credential_cache() {
            Some(cache) => cache.get_valid_token().await,
            None => Err(self.client.classifier().invalid_request("storepay client has no token cache")),
        }
    }

    /// Create a loan; returns the loan id
    pub async fn loan(&self, input: &Loan) -> Result<Value, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn loan_check(&self, loan_id: &str) -> Result<bool, ErrorEnvelope> {
        self.client
            .call(&LoanCheck {
                loan_id: loan_id.to_string(),
            })
            .await
    }

    pub async fn user_possible_amount(&self, mobile_number: &str) -> Result<f64, ErrorEnvelope> {
        self.client
            .call(&PossibleAmount {
                mobile_number: mobile_number.to_string(),
            })
            .await
    }

    /// Forget the cached token
    pub fn close(&self) {
        if let Some(cache) = self.client.credential_cache() {
            cache.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ClientConfig {
        ClientConfig::new("https://service.storepay.mn:8778/lend-merchant")
            .with_credential("app_username", "app")
            .with_credential("app_password", "app-pass")
            .with_credential("username", "merchant")
            .with_credential("password", "secret")
            .with_credential("store_id", "42")
            .with_credential("auth_url", "https://service.storepay.mn:8778/merchant-uaa")
    }

    #[test]
    fn test_refusal_uses_first_message() {
        let response = RawResponse::from_json(
            200,
            &json!({
                "status": "Failed",
                "value": null,
                "msgList": [{"code": "USER_NOT_FOUND", "text": "User not found", "params": ""}]
            }),
        );
        let refusal = detect_refusal(&response).unwrap();
        assert_eq!(refusal.code, "USER_NOT_FOUND");
        assert_eq!(
            refusal.message.as_deref(),
            Some("Failed: USER_NOT_FOUND - User not found")
        );
    }

    #[test]
    fn test_success_and_token_bodies_pass() {
        let ok = RawResponse::from_json(200, &json!({"status": "Success", "value": 7, "msgList": []}));
        assert!(detect_refusal(&ok).is_none());
        let token = RawResponse::from_json(200, &json!({"access_token": "t", "expires_in": 60}));
        assert!(detect_refusal(&token).is_none());
    }

    #[test]
    fn test_refusal_without_messages() {
        let response = RawResponse::from_json(200, &json!({"status": "Error"}));
        let refusal = detect_refusal(&response).unwrap();
        assert_eq!(refusal.code, "Error");
    }

    #[test]
    fn test_token_request() {
        let tokens = StorepayTokens::from_config(&config()).unwrap();
        let spec = tokens.token_request(None, Utc::now()).unwrap();
        assert_eq!(spec.url().path(), "/merchant-uaa/oauth/token");
        assert_eq!(
            spec.url().query(),
            Some("grant_type=password&username=app&password=app-pass")
        );
        assert_eq!(spec.header("authorization"), Some("Basic bWVyY2hhbnQ6c2VjcmV0"));
    }

    #[test]
    fn test_expires_in_is_relative() {
        let tokens = StorepayTokens::from_config(&config()).unwrap();
        let now = Utc::now();
        let response = RawResponse::from_json(200, &json!({"access_token": "t", "expires_in": 3600}));
        let credential = tokens
            .parse_token(&response, now, &ErrorClassifier::new(PROVIDER))
            .unwrap();
        assert_eq!(credential.expires_at(), now + chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_loan_is_never_retried() {
        let loan = Loan {
            mobile_number: "99112233".into(),
            description: "order 1".into(),
            amount: 150000.0,
        };
        assert_eq!(loan.retry_policy().unwrap().attempt_budget(), 1);
    }
}
