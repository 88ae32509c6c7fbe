//! Khan Bank card e-commerce gateway
//!
//! Merchant credentials travel in the JSON body. A non-zero `ErrorCode` in a
//! response is a refused operation and is reported with the merchant's
//! `OrderNumber` as the request id.
//!
//! Config credentials: `username`, `password`, optionally `language`
//! (default `mn`).

use std::sync::Arc;

use mnpay_core::http::{
    BusinessError, BusinessErrorDetector, ErrorCodeRule, RequestSpecBuilder, Transport,
};
use mnpay_core::{
    ClientConfig, Endpoint, ErrorClassifier, ErrorEnvelope, Parsed, ProviderClient,
    ProviderOperation, RawResponse,
};
use serde::{Deserialize, Serialize};

use crate::wire;

pub const PROVIDER: &str = "khanbank";

pub const ORDER_REGISTER: Endpoint = Endpoint::post("/payment/rest/register.do");
pub const ORDER_STATUS: Endpoint = Endpoint::post("/payment/rest/getOrderStatus.do");

const DEFAULT_LANGUAGE: &str = "mn";
const PAID_STATUS: &str = "2";

/// `ErrorCode` refusals, correlated by `OrderNumber` or the code itself
pub fn detector() -> impl Fn(&RawResponse) -> Option<BusinessError> + Send + Sync + 'static {
    let rule = ErrorCodeRule::new(&["ErrorCode"], &["0", "000", ""])
        .with_message_fields(&["ErrorMessage"])
        .with_reference_fields(&["OrderNumber"]);
    move |response: &RawResponse| {
        rule.detect(response).map(|mut error| {
            if error.reference.is_none() {
                error.reference = Some(error.code.clone());
            }
            error
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Merchant {
    user_name: String,
    #[serde(rename = "Password")]
    password: String,
    language: String,
}

impl Merchant {
    fn from_config(config: &ClientConfig) -> mnpay_core::Result<Self> {
        Ok(Self {
            user_name: config.credential("username")?,
            password: config.credential("password")?,
            language: config
                .optional_credential("language")?
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        })
    }
}

/// Register an order and obtain the hosted card page
#[derive(Debug, Clone)]
pub struct RegisterOrder {
    pub order_number: String,
    pub amount: f64,
    pub success_callback: String,
    pub fail_callback: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisteredOrder {
    #[serde(default, rename = "orderId", deserialize_with = "wire::opt_string")]
    pub order_id: Option<String>,
    #[serde(default, rename = "formUrl", alias = "redirectUrl", deserialize_with = "wire::opt_string")]
    pub redirect_url: Option<String>,
}

impl ProviderOperation for RegisterOrder {
    type Output = RegisteredOrder;

    fn endpoint(&self) -> Endpoint {
        ORDER_REGISTER
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let mut body = serde_json::to_value(Merchant::from_config(config)?)?;
        body["orderNumber"] = self.order_number.clone().into();
        body["amount"] = format!("{:.2}", self.amount).into();
        body["returnUrl"] = self.success_callback.clone().into();
        body["failUrl"] = self.fail_callback.clone().into();
        body["jsonParams"] = serde_json::json!({ "orderNumber": self.order_number });
        Ok(request.json(&body))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<RegisteredOrder> {
        Parsed::json(&response, classifier)
    }
}

/// Query the state of a registered order
#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    /// `orderStatus == "2"`
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub order_number: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default, rename = "orderStatus", deserialize_with = "wire::opt_string")]
    order_status: Option<String>,
    #[serde(default, rename = "ErrorCode", deserialize_with = "wire::opt_string")]
    error_code: Option<String>,
    #[serde(default, rename = "ErrorMessage", deserialize_with = "wire::opt_string")]
    error_message: Option<String>,
    #[serde(default, rename = "OrderNumber", deserialize_with = "wire::opt_string")]
    order_number: Option<String>,
    #[serde(default, rename = "Ip", deserialize_with = "wire::opt_string")]
    ip: Option<String>,
}

impl ProviderOperation for OrderStatus {
    type Output = OrderState;

    fn endpoint(&self) -> Endpoint {
        ORDER_STATUS
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let mut body = serde_json::to_value(Merchant::from_config(config)?)?;
        body["orderId"] = self.order_id.clone().into();
        Ok(request.json(&body))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<OrderState> {
        match Parsed::<StatusBody>::json(&response, classifier) {
            Parsed::Ok(body) => Parsed::Ok(OrderState {
                success: body.order_status.as_deref() == Some(PAID_STATUS),
                error_code: body.error_code,
                error_message: body.error_message,
                order_number: body.order_number,
                ip: body.ip,
            }),
            Parsed::BusinessError(envelope) => Parsed::BusinessError(envelope),
            Parsed::TransportError(envelope) => Parsed::TransportError(envelope),
        }
    }
}

/// Khan Bank client; retries with the config's linear backoff
#[derive(Debug, Clone)]
pub struct KhanBankClient {
    client: ProviderClient,
}

impl KhanBankClient {
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
        Merchant::from_config(client.config())?;
        Ok(Self {
            client: client.with_detector(detector()),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    pub async fn register_order(&self, input: &RegisterOrder) -> Result<RegisteredOrder, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn check_order(&self, order_id: &str) -> Result<OrderState, ErrorEnvelope> {
        self.client
            .call(&OrderStatus {
                order_id: order_id.to_string(),
            })
            .await
    }
}
