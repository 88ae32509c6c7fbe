//! Golomt Bank e-commerce gateway
//!
//! Requests carry a static bearer token plus an HMAC-SHA256 `checksum` over
//! protocol-ordered fields. Responses report failures in `errorCode`; any
//! value other than `"000"` is a refused payment.
//!
//! Config credentials: `secret` (checksum key) and `token` (bearer).

use std::fmt;
use std::sync::Arc;

use mnpay_core::http::{BearerAuth, ErrorCodeRule, RequestSpecBuilder, Transport};
use mnpay_core::{
    ClientAuth, ClientConfig, Endpoint, ErrorClassifier, ErrorEnvelope, Parsed, ProviderClient,
    ProviderOperation, RawResponse, RetryPolicy, SignatureSigner,
};
use serde::{Deserialize, Serialize};

use crate::wire;

pub const PROVIDER: &str = "golomt";

pub const INVOICE_CREATE: Endpoint = Endpoint::post("/api/invoice");
pub const INQUIRY: Endpoint = Endpoint::post("/api/inquiry");
pub const PAY_BY_TOKEN: Endpoint = Endpoint::post("/api/pay");

const SUCCESS_CODE: &str = "000";

pub fn detector() -> ErrorCodeRule {
    ErrorCodeRule::new(&["errorCode"], &[SUCCESS_CODE]).with_reference_fields(&["transactionId"])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Lang {
    Mn,
    En,
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lang::Mn => "MN",
            Lang::En => "EN",
        })
    }
}

/// Which hosted page the customer is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Card,
    SocialPay,
}

impl PaymentMethod {
    fn path_segment(self) -> &'static str {
        match self {
            PaymentMethod::Card => "payment",
            PaymentMethod::SocialPay => "socialpay",
        }
    }
}

/// How the gateway reports the result back to the merchant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReturnType {
    Post,
    Get,
    Mobile,
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReturnType::Post => "POST",
            ReturnType::Get => "GET",
            ReturnType::Mobile => "MOBILE",
        })
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Y"
    } else {
        "N"
    }
}

/// Amounts are signed and sent with exactly two decimals
pub fn format_amount(amount: f64) -> String {
    format!("{:.2}", amount)
}

/// Create a hosted-payment invoice
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub amount: f64,
    pub transaction_id: String,
    pub return_type: ReturnType,
    pub callback: String,
    pub generate_token: bool,
    pub social_deeplink: bool,
}

impl CreateInvoice {
    /// `transactionId ‖ amount ‖ returnType ‖ callback`
    pub fn checksum(&self, secret: &str) -> String {
        SignatureSigner::sign(
            secret,
            &[
                self.transaction_id.clone(),
                format_amount(self.amount),
                self.return_type.to_string(),
                self.callback.clone(),
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedInvoice {
    pub invoice: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub social_deeplink: Option<String>,
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
        let secret = config.credential("secret")?;
        Ok(request.json(&serde_json::json!({
            "amount": format_amount(self.amount),
            "checksum": self.checksum(&secret),
            "genToken": yes_no(self.generate_token),
            "callback": self.callback,
            "transactionId": self.transaction_id,
            "returnType": self.return_type,
            "socialDeeplink": yes_no(self.social_deeplink),
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<CreatedInvoice> {
        Parsed::json(&response, classifier)
    }
}

/// Look up the outcome of a transaction
#[derive(Debug, Clone)]
pub struct Inquiry {
    pub transaction_id: String,
}

impl Inquiry {
    /// `transactionId ‖ transactionId`
    pub fn checksum(&self, secret: &str) -> String {
        SignatureSigner::sign(secret, &[&self.transaction_id, &self.transaction_id])
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryResult {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub bank: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub error_code: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub error_desc: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub card_holder: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub card_number: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub transaction_id: Option<String>,
    /// Card token, present when the invoice asked for one
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub token: Option<String>,
}

impl ProviderOperation for Inquiry {
    type Output = InquiryResult;

    fn endpoint(&self) -> Endpoint {
        INQUIRY
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let secret = config.credential("secret")?;
        Ok(request.json(&serde_json::json!({
            "checksum": self.checksum(&secret),
            "transactionId": self.transaction_id,
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<InquiryResult> {
        Parsed::json(&response, classifier)
    }
}

/// Charge a card token saved by an earlier invoice
#[derive(Debug, Clone)]
pub struct PayByToken {
    pub amount: f64,
    pub token: String,
    pub transaction_id: String,
    pub lang: Lang,
}

impl PayByToken {
    /// `amount ‖ transactionId ‖ token`
    pub fn checksum(&self, secret: &str) -> String {
        SignatureSigner::sign(
            secret,
            &[
                self.amount.to_string(),
                self.transaction_id.clone(),
                self.token.clone(),
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayment {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub error_code: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub error_desc: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub transaction_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub card_number: Option<String>,
}

impl ProviderOperation for PayByToken {
    type Output = TokenPayment;

    fn endpoint(&self) -> Endpoint {
        PAY_BY_TOKEN
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let secret = config.credential("secret")?;
        Ok(request.json(&serde_json::json!({
            "amount": self.amount.to_string(),
            "checksum": self.checksum(&secret),
            "token": self.token,
            "transactionId": self.transaction_id,
            "lang": self.lang,
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<TokenPayment> {
        Parsed::json(&response, classifier)
    }

    // Charges the card directly.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::no_retry())
    }
}

/// Golomt e-commerce client
#[derive(Debug, Clone)]
pub struct GolomtClient {
    client: ProviderClient,
}

impl GolomtClient {
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
        config.credential("secret")?;
        let auth = BearerAuth::new(config.credential("token")?);
        Ok(Self {
            client: client
                .with_auth(ClientAuth::Static(Arc::new(auth)))
                .with_detector(detector()),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    /// Hosted payment page for an invoice: `endpoint/{method}/{lang}/{invoice}`
    pub fn payment_url(&self, invoice: &str, lang: Lang, method: PaymentMethod) -> String {
        self.client
            .config()
            .url(&format!("{}/{}/{}", method.path_segment(), lang, invoice))
    }

    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<CreatedInvoice, ErrorEnvelope> {
        let result = self.client.call(input).await;
        tag_transaction(result, &input.transaction_id)
    }

    pub async fn inquiry(&self, transaction_id: &str) -> Result<InquiryResult, ErrorEnvelope> {
        let result = self
            .client
            .call(&Inquiry {
                transaction_id: transaction_id.to_string(),
            })
            .await;
        tag_transaction(result, transaction_id)
    }

    pub async fn pay_by_token(&self, input: &PayByToken) -> Result<TokenPayment, ErrorEnvelope> {
        let result = self.client.call(input).await;
        tag_transaction(result, &input.transaction_id)
    }
}

/// Refused payments are correlated by the merchant's transaction id
fn tag_transaction<T>(result: Result<T, ErrorEnvelope>, transaction_id: &str) -> Result<T, ErrorEnvelope> {
    result.map_err(|envelope| {
        if envelope.is_business_failure() && envelope.request_id().is_none() {
            envelope.with_request_id(transaction_id)
        } else {
            envelope
        }
    })
}
