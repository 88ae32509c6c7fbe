//! HiPay checkout
//!
//! A static bearer token authenticates every call. Bodies carry a numeric
//! `code` where `1` means success; anything else is a refusal whose text is
//! `description` plus the first `details` entry.
//!
//! Config credentials: `token`, `entity_id`.

use std::borrow::Cow;
use std::sync::Arc;

use mnpay_core::http::{BearerAuth, BusinessError, RequestSpecBuilder, Transport};
use mnpay_core::{
    ClientAuth, ClientConfig, Endpoint, ErrorClassifier, ErrorEnvelope, Parsed, ProviderClient,
    ProviderOperation, RawResponse, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire;

pub const PROVIDER: &str = "hipay";

pub const CHECKOUT: Endpoint = Endpoint::post("/checkout");
pub const CHECKOUT_GET: Endpoint = Endpoint::get("/checkout/get/");
pub const PAYMENT_GET: Endpoint = Endpoint::get("/payment/get/");
pub const PAYMENT_CORRECTION: Endpoint = Endpoint::post("/pos/correction");
pub const STATEMENT: Endpoint = Endpoint::post("/pos/statement");

const SUCCESS_CODE: i64 = 1;
const CURRENCY: &str = "MNT";

#[derive(Debug, Deserialize)]
struct Detail {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    issue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(deserialize_with = "wire::code")]
    code: i64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    details: Vec<Detail>,
}

/// `code != 1`; the message is `description: field - issue`
pub fn detect_refusal(response: &RawResponse) -> Option<BusinessError> {
    let status: Status = serde_json::from_value(response.json_value()?).ok()?;
    if status.code == SUCCESS_CODE {
        return None;
    }

    let description = status.description.unwrap_or_default();
    let message = match status.details.first() {
        Some(detail) => format!(
            "{}: {} - {}",
            description,
            detail.field.as_deref().unwrap_or_default(),
            detail.issue.as_deref().unwrap_or_default()
        ),
        None => description,
    };
    tracing::debug!(provider = PROVIDER, code = status.code, "business refusal");
    Some(BusinessError::new(status.code.to_string(), Some(message)))
}

/// Open a checkout for an amount in MNT
#[derive(Debug, Clone)]
pub struct Checkout {
    pub amount: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutBody {
    entity_id: String,
    amount: f64,
    currency: &'static str,
    qr_data: bool,
    signal: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutCreated {
    pub checkout_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub qr_data: Option<String>,
}

impl ProviderOperation for Checkout {
    type Output = CheckoutCreated;

    fn endpoint(&self) -> Endpoint {
        CHECKOUT
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&CheckoutBody {
            entity_id: config.credential("entity_id")?,
            amount: self.amount,
            currency: CURRENCY,
            qr_data: true,
            signal: false,
        }))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<CheckoutCreated> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutState {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "status_date")]
    pub status_date: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub payment_id: Option<String>,
}

impl CheckoutState {
    pub fn is_paid(&self) -> bool {
        self.payment_id.as_deref().map_or(false, |id| !id.is_empty())
            && self.status.as_deref() == Some("paid")
    }
}

#[derive(Debug, Clone)]
pub struct GetCheckout {
    pub checkout_id: String,
}

#[derive(Debug, Clone)]
pub struct GetPayment {
    pub payment_id: String,
}

/// Lookups are scoped to the merchant entity in the query
fn with_entity(request: RequestSpecBuilder, config: &ClientConfig) -> mnpay_core::Result<RequestSpecBuilder> {
    Ok(request.query(&[("entityId", config.credential("entity_id")?.as_str())]))
}

impl ProviderOperation for GetCheckout {
    type Output = CheckoutState;

    fn endpoint(&self) -> Endpoint {
        CHECKOUT_GET
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", CHECKOUT_GET.path, self.checkout_id))
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        with_entity(request, config)
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<CheckoutState> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub amount: Option<String>,
    #[serde(default)]
    pub checkout_id: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub payment_date: Option<String>,
    #[serde(default, rename = "result_code", deserialize_with = "wire::opt_string")]
    pub result_code: Option<String>,
    #[serde(default, rename = "result_desc")]
    pub result_desc: Option<String>,
}

impl ProviderOperation for GetPayment {
    type Output = Payment;

    fn endpoint(&self) -> Endpoint {
        PAYMENT_GET
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", PAYMENT_GET.path, self.payment_id))
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        with_entity(request, config)
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Payment> {
        Parsed::json(&response, classifier)
    }
}

/// Reverse a payment made today
#[derive(Debug, Clone)]
pub struct Correction {
    pub payment_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Corrected {
    #[serde(default, rename = "paymentId")]
    pub payment_id: Option<String>,
    #[serde(default, rename = "correction_paymentId")]
    pub correction_payment_id: Option<String>,
}

impl ProviderOperation for Correction {
    type Output = Corrected;

    fn endpoint(&self) -> Endpoint {
        PAYMENT_CORRECTION
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&serde_json::json!({
            "entityId": config.credential("entity_id")?,
            "paymentId": self.payment_id,
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Corrected> {
        Parsed::json(&response, classifier)
    }

    // A correction moves money back to the customer.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::no_retry())
    }
}

/// Settled payments of one day, `YYYY-MM-DD`
#[derive(Debug, Clone)]
pub struct Statement {
    pub date: String,
}

impl ProviderOperation for Statement {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        STATEMENT
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&serde_json::json!({
            "entityId": config.credential("entity_id")?,
            "date": self.date,
        })))
    }

    fn parse(&self, response: RawResponse, _classifier: &ErrorClassifier) -> Parsed<Value> {
        Parsed::Ok(response.json_value().map_or(Value::Null, |body| body["data"].clone()))
    }
}

/// HiPay client authenticated with a static bearer token
#[derive(Debug, Clone)]
pub struct HipayClient {
    client: ProviderClient,
}

impl HipayClient {
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
        config.credential("entity_id")?;
        let auth = BearerAuth::new(config.credential("token")?);
        Ok(Self {
            client: client
                .with_auth(ClientAuth::Static(Arc::new(auth)))
                .with_detector(detect_refusal),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    pub async fn checkout(&self, amount: f64) -> Result<CheckoutCreated, ErrorEnvelope> {
        self.client.call(&Checkout { amount }).await
    }

    pub async fn checkout_get(&self, checkout_id: &str) -> Result<CheckoutState, ErrorEnvelope> {
        self.client
            .call(&GetCheckout {
                checkout_id: checkout_id.to_string(),
            })
            .await
    }

    pub async fn payment_get(&self, payment_id: &str) -> Result<Payment, ErrorEnvelope> {
        self.client
            .call(&GetPayment {
                payment_id: payment_id.to_string(),
            })
            .await
    }

    pub async fn payment_correction(&self, payment_id: &str) -> Result<Corrected, ErrorEnvelope> {
        self.client
            .call(&Correction {
                payment_id: payment_id.to_string(),
            })
            .await
    }

    pub async fn statement(&self, date: &str) -> Result<Value, ErrorEnvelope> {
        self.client
            .call(&Statement {
                date: date.to_string(),
            })
            .await
    }
}
