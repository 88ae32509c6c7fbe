//! U-Point loyalty transactions
//!
//! Authenticated with `Authorization: Token <token>`. Transaction replies
//! carry a numeric `result` (0 on success) and a `message`; QR lookups carry
//! neither and are judged by HTTP status alone.
//!
//! Config credentials: `token`.

use std::sync::Arc;

use mnpay_core::http::{ErrorCodeRule, HeaderAuth, RequestSpecBuilder, Transport};
use mnpay_core::{
    ClientAuth, ClientConfig, Endpoint, ErrorClassifier, ErrorEnvelope, Parsed, ProviderClient,
    ProviderOperation, RawResponse, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire;

pub const PROVIDER: &str = "upoint";

pub const CHECK_INFO: Endpoint = Endpoint::post("/transaction/thirdparty/check_info/");
pub const PROCESS_TRANSACTION: Endpoint = Endpoint::post("/transaction/thirdparty/process_transaction/");
pub const RETURN_TRANSACTION: Endpoint = Endpoint::post("/transaction/thirdparty/return_transaction/");
pub const CHECK_TRANSACTION: Endpoint = Endpoint::post("/transaction/thirdparty/check_transaction/");
pub const CANCEL_TRANSACTION: Endpoint = Endpoint::post("/transaction/thirdparty/cancel_transaction/");
pub const PRODUCT: Endpoint = Endpoint::get("/product/product/");
pub const QR: Endpoint = Endpoint::post("/transaction/thirdparty/get_qr/");
pub const CHECK_QR: Endpoint = Endpoint::post("/transaction/thirdparty/check_qr/");
pub const CHECK_QR_INFO: Endpoint = Endpoint::post("/transaction/thirdparty/check_info_qr/");
pub const PROCESS_TRANSACTION_QR: Endpoint =
    Endpoint::post("/transaction/thirdparty/process_transaction_qr/");

pub fn detector() -> ErrorCodeRule {
    ErrorCodeRule::new(&["result"], &["0"]).with_message_fields(&["message"])
}

/// `Token <token>` for the `Authorization` header
fn token_header(token: &str) -> String {
    format!("Token {}", token)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Bank {
    pub bank_code: String,
    pub non_cash_amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Manufacturer {
    pub manufacturer_code: String,
    pub manufacturer_amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Item {
    pub code: String,
    pub name: String,
    pub unit: String,
    pub quantity: f64,
    pub price: f64,
    pub total_price: f64,
}

/// Card holder lookup
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckInfo {
    pub card_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    pub pin_code: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CardInfo {
    /// 1 active, 2 new (phone required), 3 invalid, 4 wrong card
    #[serde(default)]
    pub card_status: i64,
    #[serde(default)]
    pub ua_id: Option<String>,
    #[serde(default)]
    pub card_number: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub balance: f64,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ProviderOperation for CheckInfo {
    type Output = CardInfo;

    fn endpoint(&self) -> Endpoint {
        CHECK_INFO
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<CardInfo> {
        Parsed::json(&response, classifier)
    }
}

/// Who a transaction is for: a card, or a QR the customer showed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Customer {
    Card {
        card_number: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        inter_number: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mobile: Option<String>,
    },
    Qr {
        qr_string: String,
    },
}

/// Spend and earn points against a bill
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    #[serde(flatten)]
    pub customer: Customer,
    /// `YYYY/MM/DD HH:mm:ss`
    pub date: String,
    pub bill_number: String,
    pub spend_amount: f64,
    pub bonus_amount: f64,
    pub total_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bank: Vec<Bank>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manufacturer: Vec<Manufacturer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Receipt {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub receipt_id: Option<String>,
    #[serde(default)]
    pub bill_number: Option<String>,
    #[serde(default)]
    pub card_number: Option<String>,
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub point_balance: f64,
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub total_point: f64,
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub spend_point: f64,
    #[serde(default)]
    pub date: Option<String>,
}

impl ProviderOperation for Transaction {
    type Output = Receipt;

    fn endpoint(&self) -> Endpoint {
        match self.customer {
            Customer::Card { .. } => PROCESS_TRANSACTION,
            Customer::Qr { .. } => PROCESS_TRANSACTION_QR,
        }
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Receipt> {
        Parsed::json(&response, classifier)
    }

    // Points move on every accepted attempt.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::no_retry())
    }
}

/// Look a bill up by its number
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckTransaction {
    pub bill_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
}

impl ProviderOperation for CheckTransaction {
    type Output = Receipt;

    fn endpoint(&self) -> Endpoint {
        CHECK_TRANSACTION
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Receipt> {
        Parsed::json(&response, classifier)
    }
}

/// Partial return of a receipt's points
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReturnTransaction {
    pub receipt_id: String,
    pub refund_spend_amount: f64,
    pub refund_bonus_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_cash_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bank: Vec<Bank>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manufacturer: Vec<Manufacturer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,
}

impl ProviderOperation for ReturnTransaction {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        RETURN_TRANSACTION
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Value> {
        Parsed::json(&response, classifier)
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::no_retry())
    }
}

/// Cancel a whole bill
#[derive(Debug, Clone, Default, Serialize)]
pub struct CancelTransaction {
    pub bill_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_amount: Option<f64>,
}

impl ProviderOperation for CancelTransaction {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        CANCEL_TRANSACTION
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Value> {
        Parsed::json(&response, classifier)
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::no_retry())
    }
}

/// Manufacturer product list; the login travels in the body of a GET
#[derive(Debug, Clone, Serialize)]
pub struct Products {
    pub username: String,
    pub password: String,
}

impl ProviderOperation for Products {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        PRODUCT
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Value> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoyaltyQr {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub is_new: Option<String>,
    pub qr_string: String,
}

#[derive(Debug, Clone)]
pub struct GenerateQr;

impl ProviderOperation for GenerateQr {
    type Output = LoyaltyQr;

    fn endpoint(&self) -> Endpoint {
        QR
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<LoyaltyQr> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QrScan {
    pub status: String,
    #[serde(default)]
    pub card_number: Option<String>,
}

/// Scan state of a QR, or the card holder behind it
#[derive(Debug, Clone)]
pub struct QrLookup {
    pub qr_string: String,
}

impl QrLookup {
    fn body(&self) -> Value {
        serde_json::json!({ "qr_string": self.qr_string })
    }
}

/// `check_qr`: has the customer scanned it yet
#[derive(Debug, Clone)]
pub struct CheckQr(pub QrLookup);

/// `check_info_qr`: the card holder behind a scanned QR
#[derive(Debug, Clone)]
pub struct CheckQrInfo(pub QrLookup);

impl ProviderOperation for CheckQr {
    type Output = QrScan;

    fn endpoint(&self) -> Endpoint {
        CHECK_QR
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&self.0.body()))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<QrScan> {
        Parsed::json(&response, classifier)
    }
}

impl ProviderOperation for CheckQrInfo {
    type Output = CardInfo;

    fn endpoint(&self) -> Endpoint {
        CHECK_QR_INFO
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&self.0.body()))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<CardInfo> {
        Parsed::json(&response, classifier)
    }
}

/// U-Point client authenticated with a `Token` header
#[derive(Debug, Clone)]
pub struct UpointClient {
    client: ProviderClient,
}

impl UpointClient {
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
        let token = client.config().credential("token")?;
        let auth = HeaderAuth::new().with_header("Authorization", token_header(&token));
        Ok(Self {
            client: client
                .with_auth(ClientAuth::Static(Arc::new(auth)))
                .with_detector(detector()),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    pub async fn check_user_info(&self, input: &CheckInfo) -> Result<CardInfo, ErrorEnvelope> {
        self.client.call(input).await
    }

    /// Card or QR transaction, by [`Customer`]
    pub async fn process_transaction(&self, input: &Transaction) -> Result<Receipt, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn return_transaction(&self, input: &ReturnTransaction) -> Result<Value, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn check_transaction(&self, input: &CheckTransaction) -> Result<Receipt, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn cancel_transaction(&self, input: &CancelTransaction) -> Result<Value, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn products(&self, username: &str, password: &str) -> Result<Value, ErrorEnvelope> {
        self.client
            .call(&Products {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await
    }

    pub async fn generate_qr(&self) -> Result<LoyaltyQr, ErrorEnvelope> {
        self.client.call(&GenerateQr).await
    }

    pub async fn check_qr(&self, qr_string: &str) -> Result<QrScan, ErrorEnvelope> {
        self.client
            .call(&CheckQr(QrLookup {
                qr_string: qr_string.to_string(),
            }))
            .await
    }

    pub async fn check_qr_info(&self, qr_string: &str) -> Result<CardInfo, ErrorEnvelope> {
        self.client
            .call(&CheckQrInfo(QrLookup {
                qr_string: qr_string.to_string(),
            }))
            .await
    }
}
