//! Tokipay wallet payments
//!
//! Every call carries the merchant `Authorization` key. Point-of-sale calls
//! add `api_key: spos_pay_v4` and the merchant's `im_api_key`; third-party
//! (app-to-app) calls use `api_key: third_party_pay`. Responses wrap their
//! payload as `{statusCode, error, message, data}`; a `statusCode` other
//! than 200 is a refusal.
//!
//! Config credentials: `authorization`, `im_api_key`, `merchant_id`,
//! `success_url`, `failure_url`, optionally `app_schema_ios`.

use std::sync::Arc;

use mnpay_core::http::{ErrorCodeRule, HeaderAuth, Method, RequestSpecBuilder, Transport};
use mnpay_core::{
    parse_json, ClientAuth, ClientConfig, Endpoint, ErrorClassifier, ErrorEnvelope, Parsed,
    ProviderClient, ProviderOperation, RawResponse, RetryPolicy,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PROVIDER: &str = "tokipay";

pub const POS_REQUEST: Endpoint = Endpoint::post("/jump/v4/spose/payment/request");
pub const POS_USER_REQUEST: Endpoint = Endpoint::post("/jump/v4/spose/payment/user-request");
pub const POS_SCAN_REQUEST: Endpoint = Endpoint::post("/jump/v4/spose/payment/scan/user-request");
pub const POS_STATUS: Endpoint = Endpoint::get("/jump/v4/spose/payment/status");
pub const POS_CANCEL: Endpoint = Endpoint::delete("/jump/v4/spose/payment/request");
pub const POS_REFUND: Endpoint = Endpoint::new(Method::PUT, "/jump/v4/spose/payment/refund");
pub const THIRD_PARTY_DEEPLINK: Endpoint = Endpoint::post("/jump/v1/third-party/payment/deeplink");
pub const THIRD_PARTY_REQUEST: Endpoint = Endpoint::post("/jump/v1/third-party/payment/request");
pub const THIRD_PARTY_STATUS: Endpoint = Endpoint::get("/jump/v1/third-party/payment/status");

const POS_API_KEY: &str = "spos_pay_v4";
const THIRD_PARTY_API_KEY: &str = "third_party_pay";
const DEFAULT_COUNTRY_CODE: &str = "+976";

pub fn detector() -> ErrorCodeRule {
    ErrorCodeRule::new(&["statusCode"], &["200"]).with_message_fields(&["message", "error"])
}

/// Which API family a call belongs to; decides the `api_key` headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Pos,
    ThirdParty,
}

impl Channel {
    fn apply(self, request: RequestSpecBuilder, config: &ClientConfig) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(match self {
            Channel::Pos => request
                .header("api_key", POS_API_KEY)
                .header("im_api_key", &config.credential("im_api_key")?),
            Channel::ThirdParty => request.header("api_key", THIRD_PARTY_API_KEY),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct Reply<T> {
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

fn parse_data<T: DeserializeOwned>(response: &RawResponse, classifier: &ErrorClassifier) -> Parsed<T> {
    match parse_json::<Reply<T>>(response, classifier) {
        Ok(Reply { data: Some(data), .. }) => Parsed::Ok(data),
        Ok(Reply { data: None, message }) => Parsed::TransportError(classifier.invalid_response(
            format!("response has no data: {}", message.unwrap_or_default()),
        )),
        Err(envelope) => Parsed::TransportError(envelope),
    }
}

/// How the customer is asked to pay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentTarget {
    /// Merchant shows a QR the customer scans
    Qr,
    /// Push a request to the customer's phone
    Phone {
        phone_no: String,
        country_code: Option<String>,
    },
    /// Merchant scanned the customer's QR
    Scanned { request_id: String },
}

/// Open a point-of-sale payment request
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: String,
    pub amount: f64,
    pub notes: String,
    pub target: PaymentTarget,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentBody<'a> {
    success_url: String,
    failure_url: String,
    order_id: &'a str,
    merchant_id: String,
    amount: f64,
    notes: &'a str,
    authorization: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_no: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_schema_ios: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    toki_web_success_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    toki_web_failure_url: Option<String>,
}

impl<'a> PaymentBody<'a> {
    fn new(order_id: &'a str, amount: f64, notes: &'a str, config: &ClientConfig) -> mnpay_core::Result<Self> {
        Ok(Self {
            success_url: config.credential("success_url")?,
            failure_url: config.credential("failure_url")?,
            order_id,
            merchant_id: config.credential("merchant_id")?,
            amount,
            notes,
            authorization: config.credential("authorization")?,
            phone_no: None,
            country_code: None,
            request_id: None,
            app_schema_ios: None,
            toki_web_success_url: None,
            toki_web_failure_url: None,
        })
    }

    /// Third-party calls also name the Toki web pages
    fn with_web_urls(mut self) -> Self {
        self.toki_web_success_url = Some(self.success_url.clone());
        self.toki_web_failure_url = Some(self.failure_url.clone());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHandle {
    pub request_id: String,
}

impl ProviderOperation for PaymentRequest {
    type Output = RequestHandle;

    fn endpoint(&self) -> Endpoint {
        match self.target {
            PaymentTarget::Qr => POS_REQUEST,
            PaymentTarget::Phone { .. } => POS_USER_REQUEST,
            PaymentTarget::Scanned { .. } => POS_SCAN_REQUEST,
        }
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let mut body = PaymentBody::new(&self.order_id, self.amount, &self.notes, config)?;
        match &self.target {
            PaymentTarget::Qr => {}
            PaymentTarget::Phone {
                phone_no,
                country_code,
            } => {
                body.phone_no = Some(phone_no.as_str());
                body.country_code = Some(country_code.as_deref().unwrap_or_default());
            }
            PaymentTarget::Scanned { request_id } => body.request_id = Some(request_id.as_str()),
        }
        Ok(Channel::Pos.apply(request, config)?.json(&body))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<RequestHandle> {
        parse_data(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub status: String,
}

/// Status of a request, on either channel
#[derive(Debug, Clone)]
pub struct StatusQuery {
    pub request_id: String,
    pub third_party: bool,
}

impl ProviderOperation for StatusQuery {
    type Output = PaymentStatus;

    fn endpoint(&self) -> Endpoint {
        if self.third_party {
            THIRD_PARTY_STATUS
        } else {
            POS_STATUS
        }
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let channel = if self.third_party {
            Channel::ThirdParty
        } else {
            Channel::Pos
        };
        Ok(channel
            .apply(request, config)?
            .query(&[("requestId", self.request_id.as_str())]))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<PaymentStatus> {
        parse_data(&response, classifier)
    }
}

#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub request_id: String,
}

impl ProviderOperation for CancelRequest {
    type Output = PaymentStatus;

    fn endpoint(&self) -> Endpoint {
        POS_CANCEL
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(Channel::Pos
            .apply(request, config)?
            .query(&[("requestId", self.request_id.as_str())]))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<PaymentStatus> {
        parse_data(&response, classifier)
    }
}

/// Refund a settled request, fully or partially
#[derive(Debug, Clone)]
pub struct Refund {
    pub request_id: String,
    pub refund_amount: f64,
}

/// Acknowledgement without a payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub response_type: Option<String>,
}

impl ProviderOperation for Refund {
    type Output = Ack;

    fn endpoint(&self) -> Endpoint {
        POS_REFUND
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(Channel::Pos.apply(request, config)?.json(&serde_json::json!({
            "requestId": self.request_id,
            "refundAmount": self.refund_amount,
            "merchantId": config.credential("merchant_id")?,
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Ack> {
        Parsed::json(&response, classifier)
    }

    // Money leaves the merchant on every accepted attempt.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::no_retry())
    }
}

/// Deeplink that opens the Toki app from a third-party app
#[derive(Debug, Clone)]
pub struct ThirdPartyDeeplink {
    pub order_id: String,
    pub amount: f64,
    pub notes: String,
    /// Overrides the configured `success_url` for this payment
    pub success_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Deeplink {
    pub deeplink: String,
}

impl ProviderOperation for ThirdPartyDeeplink {
    type Output = Deeplink;

    fn endpoint(&self) -> Endpoint {
        THIRD_PARTY_DEEPLINK
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let mut body = PaymentBody::new(&self.order_id, self.amount, &self.notes, config)?.with_web_urls();
        if let Some(url) = &self.success_url {
            body.success_url = url.clone();
        }
        body.app_schema_ios = Some(config.optional_credential("app_schema_ios")?.unwrap_or_default());
        Ok(Channel::ThirdParty.apply(request, config)?.json(&body))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Deeplink> {
        parse_data(&response, classifier)
    }
}

/// Third-party payment request pushed to a phone number
#[derive(Debug, Clone)]
pub struct ThirdPartyPhoneRequest {
    pub order_id: String,
    pub amount: f64,
    pub notes: String,
    pub phone_no: String,
    /// Defaults to +976
    pub country_code: Option<String>,
}

impl ProviderOperation for ThirdPartyPhoneRequest {
    type Output = serde_json::Value;

    fn endpoint(&self) -> Endpoint {
        THIRD_PARTY_REQUEST
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let mut body = PaymentBody::new(&self.order_id, self.amount, &self.notes, config)?.with_web_urls();
        body.phone_no = Some(self.phone_no.as_str());
        body.country_code = Some(self.country_code.as_deref().unwrap_or(DEFAULT_COUNTRY_CODE));
        Ok(Channel::ThirdParty.apply(request, config)?.json(&body))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<serde_json::Value> {
        parse_data(&response, classifier)
    }
}

/// Tokipay client authenticated with static merchant keys
#[derive(Debug, Clone)]
pub struct TokipayClient {
    client: ProviderClient,
}

impl TokipayClient {
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
        for name in ["merchant_id", "success_url", "failure_url", "im_api_key"] {
            config.credential(name)?;
        }
        let auth = HeaderAuth::new().with_header("Authorization", config.credential("authorization")?);
        Ok(Self {
            client: client
                .with_detector(detector())
                .with_auth(ClientAuth::Static(Arc::new(auth))),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    pub async fn payment_request(&self, input: &PaymentRequest) -> Result<RequestHandle, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn payment_status(&self, request_id: &str) -> Result<PaymentStatus, ErrorEnvelope> {
        self.client
            .call(&StatusQuery {
                request_id: request_id.to_string(),
                third_party: false,
            })
            .await
    }

    pub async fn cancel_payment(&self, request_id: &str) -> Result<PaymentStatus, ErrorEnvelope> {
        self.client
            .call(&CancelRequest {
                request_id: request_id.to_string(),
            })
            .await
    }

    pub async fn refund(&self, request_id: &str, refund_amount: f64) -> Result<Ack, ErrorEnvelope> {
        self.client
            .call(&Refund {
                request_id: request_id.to_string(),
                refund_amount,
            })
            .await
    }

    pub async fn deeplink(&self, input: &ThirdPartyDeeplink) -> Result<Deeplink, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn phone_request(&self, input: &ThirdPartyPhoneRequest) -> Result<serde_json::Value, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn third_party_status(&self, request_id: &str) -> Result<PaymentStatus, ErrorEnvelope> {
        self.client
            .call(&StatusQuery {
                request_id: request_id.to_string(),
                third_party: true,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnpay_core::http::BusinessErrorDetector;
    use mnpay_core::RequestSpec;
    use serde_json::{json, Value};

    fn config() -> ClientConfig {
        ClientConfig::new("https://ms-api.toki.mn")
            .with_credential("authorization", "merchant-key")
            .with_credential("im_api_key", "im-key")
            .with_credential("merchant_id", "M-1")
            .with_credential("success_url", "https://shop.mn/ok")
            .with_credential("failure_url", "https://shop.mn/fail")
    }

    fn prepared<O: ProviderOperation>(op: &O) -> mnpay_core::RequestSpec {
        let url = format!("https://ms-api.toki.mn{}", op.path());
        op.prepare(RequestSpec::builder(op.endpoint().method, &url), &config())
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_pos_headers_and_body() {
        let spec = prepared(&PaymentRequest {
            order_id: "O-1".into(),
            amount: 2500.0,
            notes: "latte".into(),
            target: PaymentTarget::Phone {
                phone_no: "99112233".into(),
                country_code: Some("+976".into()),
            },
        });
        assert_eq!(spec.url().path(), "/jump/v4/spose/payment/user-request");
        assert_eq!(spec.header("api_key"), Some("spos_pay_v4"));
        assert_eq!(spec.header("im_api_key"), Some("im-key"));
        let body: Value = serde_json::from_slice(spec.body().unwrap()).unwrap();
        assert_eq!(body["merchantId"], "M-1");
        assert_eq!(body["authorization"], "merchant-key");
        assert_eq!(body["phoneNo"], "99112233");
        assert!(body.get("requestId").is_none());
    }

    #[test]
    fn test_third_party_headers() {
        let spec = prepared(&ThirdPartyDeeplink {
            order_id: "O-2".into(),
            amount: 100.0,
            notes: String::new(),
            success_url: Some("myapp://paid".into()),
        });
        assert_eq!(spec.header("api_key"), Some("third_party_pay"));
        assert_eq!(spec.header("im_api_key"), None);
        let body: Value = serde_json::from_slice(spec.body().unwrap()).unwrap();
        assert_eq!(body["successUrl"], "myapp://paid");
        assert_eq!(body["tokiWebSuccessUrl"], "https://shop.mn/ok");
        assert_eq!(body["appSchemaIos"], "");
    }

    #[test]
    fn test_status_query_and_refund_policy() {
        let spec = prepared(&StatusQuery {
            request_id: "R-9".into(),
            third_party: false,
        });
        assert_eq!(spec.url().query(), Some("requestId=R-9"));

        let refund = Refund {
            request_id: "R-9".into(),
            refund_amount: 10.0,
        };
        assert_eq!(refund.endpoint().method, Method::PUT);
        assert_eq!(refund.retry_policy().unwrap().attempt_budget(), 1);
    }

    #[test]
    fn test_status_code_refusal() {
        let refused = RawResponse::from_json(
            200,
            &json!({"statusCode": 400, "error": "Bad Request", "message": "Insufficient balance"}),
        );
        let error = detector().detect(&refused).unwrap();
        assert_eq!(error.code, "400");
        assert_eq!(error.message.as_deref(), Some("Insufficient balance"));

        let ok = RawResponse::from_json(200, &json!({"statusCode": 200, "data": {"requestId": "R"}}));
        assert!(detector().detect(&ok).is_none());
    }

    #[test]
    fn test_missing_data_is_invalid_response() {
        let op = CancelRequest {
            request_id: "R".into(),
        };
        let response = RawResponse::from_json(200, &json!({"statusCode": 200, "message": "gone"}));
        let envelope = op
            .parse(response, &ErrorClassifier::new(PROVIDER))
            .into_result()
            .unwrap_err();
        assert!(envelope.message().contains("gone"));
    }
}
