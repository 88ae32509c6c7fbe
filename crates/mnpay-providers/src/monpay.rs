//! Monpay wallet
//!
//! Two independent surfaces share the host:
//! - branch QR purchases, authenticated with Basic(`username`, `account_id`);
//! - deeplink invoices, authenticated with an OAuth2 client-credentials token
//!   (`client_id`, `client_secret`) whose `expiresIn` is relative.
//!
//! Both answer `{code, info, result}`; a non-zero `code` is a refusal.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mnpay_core::http::{BasicAuth, ErrorCodeRule, RequestSpecBuilder, Transport};
use mnpay_core::{
    parse_json, ClientAuth, ClientConfig, Credential, CredentialCache, Endpoint, ErrorClassifier,
    ErrorEnvelope, Parsed, ProviderClient, ProviderOperation, RawResponse, RequestSpec,
    TokenSource, DEFAULT_MARGIN,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::wire;

pub const PROVIDER: &str = "monpay";

pub const QR_GENERATE: Endpoint = Endpoint::post("/rest/branch/qrpurchase/generate");
pub const QR_CHECK: Endpoint = Endpoint::get("/rest/branch/qrpurchase/check");
pub const DEEPLINK_AUTH: Endpoint = Endpoint::post("/oauth/token");
pub const DEEPLINK_CREATE: Endpoint = Endpoint::post("/api/oauth/invoice");
pub const DEEPLINK_CHECK: Endpoint = Endpoint::get("/api/oauth/invoice/");

pub fn detector() -> ErrorCodeRule {
    ErrorCodeRule::new(&["code"], &["0"]).with_message_fields(&["info"])
}

#[derive(Debug, Deserialize)]
struct Reply<T> {
    result: T,
}

fn parse_result<T: DeserializeOwned>(response: &RawResponse, classifier: &ErrorClassifier) -> Parsed<T> {
    match parse_json::<Reply<T>>(response, classifier) {
        Ok(reply) => Parsed::Ok(reply.result),
        Err(envelope) => Parsed::TransportError(envelope),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

/// Generate a purchase QR for a branch
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQr {
    pub amount: f64,
    pub branch_id: String,
    pub products: Vec<Product>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nhat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
    /// Seconds the QR stays payable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Qr {
    pub qrcode: String,
    pub uuid: String,
}

impl ProviderOperation for GenerateQr {
    type Output = Qr;

    fn endpoint(&self) -> Endpoint {
        QR_GENERATE
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Qr> {
        parse_result(&response, classifier)
    }
}

/// State of a purchase QR
#[derive(Debug, Clone)]
pub struct CheckQr {
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayment {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub transaction_id: Option<String>,
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub amount: f64,
    /// Epoch milliseconds; absent until the QR is paid
    #[serde(default)]
    pub used_at: Option<i64>,
    #[serde(default)]
    pub user_phone: Option<String>,
}

impl QrPayment {
    pub fn is_paid(&self) -> bool {
        self.used_at.is_some()
    }
}

impl ProviderOperation for CheckQr {
    type Output = QrPayment;

    fn endpoint(&self) -> Endpoint {
        QR_CHECK
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.query(&[("uuid", self.uuid.as_str())]))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<QrPayment> {
        parse_result(&response, classifier)
    }
}

/// Monpay branch QR client
#[derive(Debug, Clone)]
pub struct MonpayClient {
    client: ProviderClient,
}

impl MonpayClient {
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
        let auth = BasicAuth::new(config.credential("username")?, config.credential("account_id")?);
        Ok(Self {
            client: client
                .with_detector(detector())
                .with_auth(ClientAuth::Static(Arc::new(auth))),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    pub async fn generate_qr(&self, input: &GenerateQr) -> Result<Qr, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn check_qr(&self, uuid: &str) -> Result<QrPayment, ErrorEnvelope> {
        self.client
            .call(&CheckQr {
                uuid: uuid.to_string(),
            })
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessToken {
    access_token: String,
    /// Seconds from issue
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

/// Issues deeplink tokens through the client-credentials grant
#[derive(Debug)]
pub struct MonpayTokens {
    token_url: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
}

impl MonpayTokens {
    pub fn from_config(config: &ClientConfig) -> mnpay_core::Result<Self> {
        Ok(Self {
            token_url: config.url(DEEPLINK_AUTH.path),
            client_id: config.credential("client_id")?,
            client_secret: config.credential("client_secret")?,
            timeout: config.timeout(),
        })
    }
}

impl TokenSource for MonpayTokens {
    fn token_request(
        &self,
        _previous: Option<&Credential>,
        _now: DateTime<Utc>,
    ) -> mnpay_core::Result<RequestSpec> {
        RequestSpec::post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .timeout(self.timeout)
            .build()
    }

    fn parse_token(
        &self,
        response: &RawResponse,
        now: DateTime<Utc>,
        classifier: &ErrorClassifier,
    ) -> Result<Credential, ErrorEnvelope> {
        let token: AccessToken = parse_json(response, classifier)?;
        let credential =
            Credential::new(token.access_token, now + chrono::Duration::seconds(token.expires_in));
        Ok(match token.scope {
            Some(scope) => credential.with_scope(scope),
            None => credential,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceType {
    P2P,
    P2B,
    B2B,
    #[default]
    Purchase,
}

/// Create a deeplink invoice the customer opens in the Monpay app
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeeplink {
    pub redirect_uri: String,
    pub amount: f64,
    /// Server-to-server notification URL; the config `callback_url` when empty
    pub client_service_url: String,
    pub receiver: String,
    pub invoice_type: InvoiceType,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeeplinkInvoice {
    #[serde(deserialize_with = "wire::opt_string", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub amount: f64,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub invoice_type: Option<InvoiceType>,
    #[serde(default)]
    pub create_date: Option<String>,
    #[serde(default)]
    pub update_date: Option<String>,
}

impl ProviderOperation for CreateDeeplink {
    type Output = DeeplinkInvoice;

    fn endpoint(&self) -> Endpoint {
        DEEPLINK_CREATE
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        if self.client_service_url.is_empty() {
            let mut body = self.clone();
            body.client_service_url = config.callback_url.clone().unwrap_or_default();
            return Ok(request.json(&body));
        }
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<DeeplinkInvoice> {
        parse_result(&response, classifier)
    }
}

#[derive(Debug, Clone)]
pub struct CheckDeeplink {
    pub invoice_id: String,
}

impl ProviderOperation for CheckDeeplink {
    type Output = DeeplinkInvoice;

    fn endpoint(&self) -> Endpoint {
        DEEPLINK_CHECK
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", DEEPLINK_CHECK.path, self.invoice_id))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<DeeplinkInvoice> {
        parse_result(&response, classifier)
    }
}

/// Notification posted to `clientServiceUrl` once a deeplink invoice settles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeeplinkCallback {
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub amount: f64,
    #[serde(deserialize_with = "wire::opt_string", default)]
    pub invoice_id: Option<String>,
    pub status: String,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub tnx_id: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

impl DeeplinkCallback {
    pub fn is_paid(&self) -> bool {
        self.status.eq_ignore_ascii_case("PAID")
    }
}

/// Monpay deeplink client with a cached client-credentials token
#[derive(Debug, Clone)]
pub struct MonpayDeeplinkClient {
    client: ProviderClient,
}

impl MonpayDeeplinkClient {
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
        let client = client.with_detector(detector());
        let config = client.config();
        let cache = CredentialCache::builder(MonpayTokens::from_config(config)?, client.executor().clone())
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
            None => Err(self.client.classifier().invalid_request("monpay client has no token cache")),
        }
    }

    pub async fn create_invoice(&self, input: &CreateDeeplink) -> Result<DeeplinkInvoice, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn check_invoice(&self, invoice_id: &str) -> Result<DeeplinkInvoice, ErrorEnvelope> {
        self.client
            .call(&CheckDeeplink {
                invoice_id: invoice_id.to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnpay_core::http::BusinessErrorDetector;
    use serde_json::json;

    #[test]
    fn test_nonzero_code_is_refusal() {
        let refused = RawResponse::from_json(200, &json!({"code": 11, "info": "Branch not found"}));
        let error = detector().detect(&refused).unwrap();
        assert_eq!(error.code, "11");
        assert_eq!(error.message.as_deref(), Some("Branch not found"));

        let ok = RawResponse::from_json(200, &json!({"code": 0, "info": "ok", "result": {}}));
        assert!(detector().detect(&ok).is_none());
    }

    #[test]
    fn test_generate_qr_body_omits_unset_fields() {
        let op = GenerateQr {
            amount: 1000.0,
            branch_id: "B1".into(),
            products: vec![Product {
                name: "Coffee".into(),
                quantity: 1,
                price: 1000.0,
            }],
            title: "Order 7".into(),
            ..Default::default()
        };
        let body = serde_json::to_value(&op).unwrap();
        assert_eq!(body["branchId"], "B1");
        assert_eq!(body["products"][0]["quantity"], 1);
        assert!(body.get("subTitle").is_none());
        assert!(body.get("expireTime").is_none());
    }

    #[test]
    fn test_qr_check_parse() {
        let op = CheckQr { uuid: "u-1".into() };
        let response = RawResponse::from_json(
            200,
            &json!({"code": 0, "info": "ok", "result": {"uuid": "u-1", "transactionId": 991, "amount": "1000", "usedAt": 1700000000000i64}}),
        );
        let payment = op
            .parse(response, &ErrorClassifier::new(PROVIDER))
            .into_result()
            .unwrap();
        assert!(payment.is_paid());
        assert_eq!(payment.transaction_id.as_deref(), Some("991"));
        assert_eq!(payment.amount, 1000.0);
    }

    #[test]
    fn test_token_request_is_form_encoded() {
        let config = ClientConfig::new("https://z-wallet.monpay.mn")
            .with_credential("client_id", "cid")
            .with_credential("client_secret", "sec");
        let spec = MonpayTokens::from_config(&config)
            .unwrap()
            .token_request(None, Utc::now())
            .unwrap();
        assert_eq!(spec.url().path(), "/oauth/token");
        assert_eq!(
            std::str::from_utf8(spec.body().unwrap()).unwrap(),
            "client_id=cid&client_secret=sec&grant_type=client_credentials"
        );
        assert!(spec
            .header("content-type")
            .unwrap()
            .starts_with("application/x-www-form-urlencoded"));
    }

    #[test]
    fn test_token_expiry_is_relative() {
        let tokens = MonpayTokens::from_config(
            &ClientConfig::new("https://z-wallet.monpay.mn")
                .with_credential("client_id", "cid")
                .with_credential("client_secret", "sec"),
        )
        .unwrap();
        let now = Utc::now();
        let response = RawResponse::from_json(
            200,
            &json!({"accessToken": "tok", "tokenType": "bearer", "expiresIn": 3600, "scope": "invoice"}),
        );
        let credential = tokens
            .parse_token(&response, now, &ErrorClassifier::new(PROVIDER))
            .unwrap();
        assert_eq!(credential.access_token(), "tok");
        assert_eq!(credential.expires_at(), now + chrono::Duration::seconds(3600));
        assert_eq!(credential.scope(), Some("invoice"));
    }

    #[test]
    fn test_deeplink_falls_back_to_configured_callback() {
        let config = ClientConfig::new("https://z-wallet.monpay.mn")
            .with_callback_url("https://shop.mn/monpay");
        let op = CreateDeeplink {
            amount: 500.0,
            receiver: "merchant-1".into(),
            description: "order 9".into(),
            ..Default::default()
        };
        let spec = op
            .prepare(RequestSpec::post("https://z-wallet.monpay.mn/api/oauth/invoice"), &config)
            .unwrap()
            .build()
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(spec.body().unwrap()).unwrap();
        assert_eq!(body["clientServiceUrl"], "https://shop.mn/monpay");
        assert_eq!(body["invoiceType"], "PURCHASE");
    }

    #[test]
    fn test_callback_status() {
        let callback: DeeplinkCallback = serde_json::from_value(
            json!({"amount": 500, "invoiceId": 12, "status": "PAID", "tnxId": "T1", "info": "ok"}),
        )
        .unwrap();
        assert!(callback.is_paid());
        assert_eq!(callback.invoice_id.as_deref(), Some("12"));
    }
}
