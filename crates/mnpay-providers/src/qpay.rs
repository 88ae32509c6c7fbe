//! QPay merchant API (v2)
//!
//! Bearer tokens come from `POST /auth/token` with Basic credentials and are
//! renewed through `POST /auth/refresh` while the refresh token lasts. The
//! login response reports `expiresIn` as an absolute epoch-seconds value.
//!
//! Config credentials: `username`, `password`, `invoice_code`. The callback
//! URL is taken from `callback_url`.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mnpay_core::http::{BasicAuth, RequestSpecBuilder, Transport};
use mnpay_core::{
    parse_json, ClientAuth, ClientConfig, Credential, CredentialCache, Endpoint, ErrorClassifier,
    ErrorEnvelope, Parsed, ProviderClient, ProviderOperation, RawResponse, RequestSpec,
    RetryPolicy, TokenSource,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROVIDER: &str = "qpay";

/// Tokens are renewed this long before `expiresIn`. Set `token_margin_secs`
/// to override it for short-lived tokens.
pub const DEFAULT_TOKEN_MARGIN: Duration = Duration::from_secs(12 * 60 * 60);

pub const AUTH_TOKEN: Endpoint = Endpoint::post("/auth/token");
pub const AUTH_REFRESH: Endpoint = Endpoint::post("/auth/refresh");
pub const INVOICE_CREATE: Endpoint = Endpoint::post("/invoice");
pub const INVOICE_GET: Endpoint = Endpoint::get("/invoice/");
pub const INVOICE_CANCEL: Endpoint = Endpoint::delete("/invoice/");
pub const PAYMENT_GET: Endpoint = Endpoint::get("/payment/get/");
pub const PAYMENT_CHECK: Endpoint = Endpoint::post("/payment/check");
pub const PAYMENT_CANCEL: Endpoint = Endpoint::delete("/payment/cancel/");
pub const PAYMENT_REFUND: Endpoint = Endpoint::delete("/payment/refund/");

/// Login and refresh response
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(alias = "refreshToken", default)]
    pub refresh_token: Option<String>,
    /// Absolute expiry, epoch seconds
    #[serde(alias = "expiresIn")]
    pub expires_in: i64,
    #[serde(alias = "refreshExpiresIn", default)]
    pub refresh_expires_in: Option<i64>,
    #[serde(alias = "tokenType", default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl LoginResponse {
    fn into_credential(self, classifier: &ErrorClassifier) -> Result<Credential, ErrorEnvelope> {
        let expires_at = epoch(self.expires_in)
            .ok_or_else(|| classifier.invalid_response("expiresIn is not a valid timestamp"))?;
        let mut credential = Credential::new(self.access_token, expires_at);
        if let Some(refresh_token) = self.refresh_token.filter(|t| !t.is_empty()) {
            credential = credential
                .with_refresh_token(refresh_token, self.refresh_expires_in.and_then(epoch));
        }
        if let Some(scope) = self.scope {
            credential = credential.with_scope(scope);
        }
        Ok(credential)
    }
}

fn epoch(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

/// Issues QPay bearer tokens
#[derive(Debug)]
pub struct QpayTokens {
    token_url: String,
    refresh_url: String,
    auth: BasicAuth,
    terminal_id: Option<String>,
    timeout: Duration,
}

impl QpayTokens {
    pub fn from_config(config: &ClientConfig) -> mnpay_core::Result<Self> {
        Ok(Self {
            token_url: config.url(AUTH_TOKEN.path),
            refresh_url: config.url(AUTH_REFRESH.path),
            auth: BasicAuth::new(config.credential("username")?, config.credential("password")?),
            terminal_id: None,
            timeout: config.timeout(),
        })
    }

    /// Send `{"terminal_id": ...}` with the login request
    pub fn with_terminal_id(mut self, terminal_id: impl Into<String>) -> Self {
        self.terminal_id = Some(terminal_id.into());
        self
    }
}

impl TokenSource for QpayTokens {
    fn token_request(
        &self,
        previous: Option<&Credential>,
        now: DateTime<Utc>,
    ) -> mnpay_core::Result<RequestSpec> {
        let refresh_token = previous
            .filter(|credential| credential.can_refresh_at(now))
            .and_then(Credential::refresh_token);

        match refresh_token {
            Some(refresh_token) => RequestSpec::post(&self.refresh_url)
                .bearer(refresh_token)
                .timeout(self.timeout)
                .build(),
            None => {
                if previous.is_some() {
                    tracing::debug!(url = %self.token_url, "no usable refresh token, logging in");
                }
                let login = RequestSpec::post(&self.token_url)
                    .auth(&self.auth)
                    .timeout(self.timeout);
                match &self.terminal_id {
                    Some(terminal_id) => login
                        .json(&serde_json::json!({ "terminal_id": terminal_id }))
                        .build(),
                    None => login.build(),
                }
            }
        }
    }

    fn parse_token(
        &self,
        response: &RawResponse,
        _now: DateTime<Utc>,
        classifier: &ErrorClassifier,
    ) -> Result<Credential, ErrorEnvelope> {
        parse_json::<LoginResponse>(response, classifier)?.into_credential(classifier)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceRequest<'a> {
    invoice_code: String,
    sender_invoice_code: &'a str,
    sender_branch_code: &'a str,
    invoice_receiver_code: &'a str,
    invoice_description: &'a str,
    amount: f64,
    callback_url: String,
}

/// Input for [`CreateInvoice`]
#[derive(Debug, Clone, Default)]
pub struct CreateInvoice {
    pub sender_code: String,
    pub sender_branch_code: String,
    pub receiver_code: String,
    pub description: String,
    pub amount: f64,
    /// Appended to the callback URL as a query string
    pub callback_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceUrls {
    #[serde(default)]
    pub web: Option<String>,
    #[serde(default)]
    pub deeplink: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedInvoice {
    pub invoice_id: String,
    #[serde(default)]
    pub qr_data: Option<String>,
    #[serde(default)]
    pub qr_image: Option<String>,
    #[serde(default)]
    pub urls: Option<InvoiceUrls>,
}

/// `callback?key=value&...`, or the bare callback when there are no params
fn callback_with_params(callback: &str, params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return callback.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{}?{}", callback, query)
}

impl ProviderOperation for CreateInvoice {
    type Output = CreatedInvoice;

    fn endpoint(&self) -> Endpoint {
        INVOICE_CREATE
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let callback = config
            .callback_url
            .as_deref()
            .ok_or_else(|| mnpay_core::Error::config("qpay requires callback_url"))?;
        Ok(request.json(&InvoiceRequest {
            invoice_code: config.credential("invoice_code")?,
            sender_invoice_code: &self.sender_code,
            sender_branch_code: &self.sender_branch_code,
            invoice_receiver_code: &self.receiver_code,
            invoice_description: &self.description,
            amount: self.amount,
            callback_url: callback_with_params(callback, &self.callback_params),
        }))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<CreatedInvoice> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub invoice_id: String,
    #[serde(default, alias = "invoiceStatus")]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// `GET /invoice/{id}`
#[derive(Debug, Clone)]
pub struct GetInvoice {
    pub invoice_id: String,
}

impl ProviderOperation for GetInvoice {
    type Output = Invoice;

    fn endpoint(&self) -> Endpoint {
        INVOICE_GET
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", INVOICE_GET.path, self.invoice_id))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Invoice> {
        Parsed::json(&response, classifier)
    }
}

/// `DELETE /invoice/{id}`
#[derive(Debug, Clone)]
pub struct CancelInvoice {
    pub invoice_id: String,
}

impl ProviderOperation for CancelInvoice {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        INVOICE_CANCEL
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", INVOICE_CANCEL.path, self.invoice_id))
    }

    fn parse(&self, response: RawResponse, _classifier: &ErrorClassifier) -> Parsed<Value> {
        Parsed::Ok(response.json_value().unwrap_or(Value::Null))
    }
}

/// `GET /payment/get/{id}`
#[derive(Debug, Clone)]
pub struct GetPayment {
    pub payment_id: String,
}

impl ProviderOperation for GetPayment {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        PAYMENT_GET
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", PAYMENT_GET.path, self.payment_id))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Value> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRow {
    pub payment_id: String,
    #[serde(default, alias = "paymentStatus")]
    pub status: Option<String>,
    #[serde(default, alias = "paymentAmount")]
    pub amount: Option<f64>,
    #[serde(default, alias = "paymentDate")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentCheck {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub rows: Vec<PaymentRow>,
}

impl PaymentCheck {
    pub fn is_paid(&self) -> bool {
        self.rows
            .iter()
            .any(|row| row.status.as_deref() == Some("PAID"))
    }
}

/// `POST /payment/check` for the payments of one invoice
#[derive(Debug, Clone)]
pub struct CheckPayment {
    pub invoice_id: String,
    pub page_limit: u32,
    pub page_number: u32,
}

impl CheckPayment {
    pub fn first_page(invoice_id: impl Into<String>) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            page_limit: 100,
            page_number: 1,
        }
    }
}

impl ProviderOperation for CheckPayment {
    type Output = PaymentCheck;

    fn endpoint(&self) -> Endpoint {
        PAYMENT_CHECK
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&serde_json::json!({
            "objectID": self.invoice_id,
            "objectType": "INVOICE",
            "offset": {
                "pageLimit": self.page_limit,
                "pageNumber": self.page_number,
            },
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<PaymentCheck> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reversal {
    Cancel,
    Refund,
}

/// Cancel (same day) or refund a payment
#[derive(Debug, Clone)]
pub struct ReversePayment {
    pub invoice_id: String,
    pub payment_uuid: String,
    kind: Reversal,
}

impl ReversePayment {
    pub fn cancel(invoice_id: impl Into<String>, payment_uuid: impl Into<String>) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            payment_uuid: payment_uuid.into(),
            kind: Reversal::Cancel,
        }
    }

    pub fn refund(invoice_id: impl Into<String>, payment_uuid: impl Into<String>) -> Self {
        Self {
            kind: Reversal::Refund,
            ..Self::cancel(invoice_id, payment_uuid)
        }
    }
}

impl ProviderOperation for ReversePayment {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        match self.kind {
            Reversal::Cancel => PAYMENT_CANCEL,
            Reversal::Refund => PAYMENT_REFUND,
        }
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", self.endpoint().path, self.invoice_id))
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let callback = config.callback_url.as_deref().unwrap_or_default();
        Ok(request.json(&serde_json::json!({
            "callbackUrl": format!("{}{}", callback, self.payment_uuid),
            "note": format!("Cancel payment - {}", self.invoice_id),
        })))
    }

    fn parse(&self, response: RawResponse, _classifier: &ErrorClassifier) -> Parsed<Value> {
        Parsed::Ok(response.json_value().unwrap_or(Value::Null))
    }

    // Reversals are not idempotent.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::no_retry())
    }
}

/// QPay client with a cached bearer token
#[derive(Debug, Clone)]
pub struct QpayClient {
    client: ProviderClient,
}

impl QpayClient {
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
        let config = client.config();
        let tokens = QpayTokens::from_config(config)?;
        let cache = CredentialCache::builder(tokens, client.executor().clone())
            .margin(config.token_margin(DEFAULT_TOKEN_MARGIN))
            .retry_policy(client.retry_policy().clone())
            .build();
        Ok(Self {
            client: client.with_auth(ClientAuth::Cached(cache)),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    /// A currently valid access token, fetching one if needed
    pub async fn token(&self) -> Result<Credential, ErrorEnvelope> {
        match self.client.credential_cache() {
            Some(cache) => cache.get_valid_token().await,
            None => Err(self.client.classifier().invalid_request("qpay client has no token cache")),
        }
    }

    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<CreatedInvoice, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> Result<Invoice, ErrorEnvelope> {
        self.client
            .call(&GetInvoice {
                invoice_id: invoice_id.to_string(),
            })
            .await
    }

    pub async fn cancel_invoice(&self, invoice_id: &str) -> Result<Value, ErrorEnvelope> {
        self.client
            .call(&CancelInvoice {
                invoice_id: invoice_id.to_string(),
            })
            .await
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Value, ErrorEnvelope> {
        self.client
            .call(&GetPayment {
                payment_id: payment_id.to_string(),
            })
            .await
    }

    pub async fn check_payment(
        &self,
        invoice_id: &str,
        page_limit: u32,
        page_number: u32,
    ) -> Result<PaymentCheck, ErrorEnvelope> {
        self.client
            .call(&CheckPayment {
                invoice_id: invoice_id.to_string(),
                page_limit,
                page_number,
            })
            .await
    }

    pub async fn cancel_payment(&self, invoice_id: &str, payment_uuid: &str) -> Result<Value, ErrorEnvelope> {
        self.client
            .call(&ReversePayment::cancel(invoice_id, payment_uuid))
            .await
    }

    pub async fn refund_payment(&self, invoice_id: &str, payment_uuid: &str) -> Result<Value, ErrorEnvelope> {
        self.client
            .call(&ReversePayment::refund(invoice_id, payment_uuid))
            .await
    }
}
