//! Golomt SocialPay point-of-sale API
//!
//! Every request is signed with the terminal's secret. Responses are wrapped
//! in `{"header": {"status", "code"}, "body": {"response" | "error"}}`; a
//! header code other than 200 is a refusal whatever the HTTP status.
//!
//! Config credentials: `terminal`, `secret`.

use std::sync::Arc;

use mnpay_core::http::{BusinessError, RequestSpecBuilder, Transport};
use mnpay_core::{
    ClientConfig, Endpoint, ErrorClassifier, ErrorEnvelope, Parsed, ProviderClient,
    ProviderOperation, RawResponse, SignatureSigner,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire;

pub const PROVIDER: &str = "socialpay";

pub const INVOICE_PHONE: Endpoint = Endpoint::post("/pos/invoice/phone");
pub const INVOICE_QR: Endpoint = Endpoint::post("/pos/invoice/qr");
pub const INVOICE_CANCEL: Endpoint = Endpoint::post("/pos/invoice/cancel");
pub const INVOICE_CHECK: Endpoint = Endpoint::post("/pos/invoice/check");
pub const PAYMENT_CANCEL: Endpoint = Endpoint::post("/pos/payment/cancel");
pub const SETTLEMENT: Endpoint = Endpoint::post("/pos/settlement");

const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(deserialize_with = "wire::code")]
    code: i64,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Body {
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    header: Header,
    #[serde(default)]
    body: Body,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub error_desc: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub error_type: Option<String>,
}

/// Refusals reported in the response header
pub fn detect_refusal(response: &RawResponse) -> Option<BusinessError> {
    let envelope: Envelope = response.json().ok()?;
    if envelope.header.code == SUCCESS_CODE {
        return None;
    }
    let detail = envelope
        .body
        .error
        .and_then(|error| serde_json::from_value::<ErrorDetail>(error).ok());
    let message = detail
        .and_then(|d| d.error_desc)
        .or(envelope.header.status);
    tracing::debug!(provider = PROVIDER, code = envelope.header.code, "business refusal");
    Some(BusinessError::new(envelope.header.code.to_string(), message))
}

/// `body.response` of a successful envelope
fn parse_response<T: DeserializeOwned>(
    response: &RawResponse,
    classifier: &ErrorClassifier,
) -> Parsed<T> {
    let envelope: Envelope = match response.json() {
        Ok(envelope) => envelope,
        Err(e) => {
            return Parsed::TransportError(
                classifier
                    .invalid_response(format!("unexpected response body: {}", e))
                    .with_cause(e),
            )
        }
    };
    let Some(body) = envelope.body.response else {
        return Parsed::TransportError(classifier.invalid_response("response body is empty"));
    };
    match serde_json::from_value(body) {
        Ok(value) => Parsed::Ok(value),
        Err(e) => Parsed::TransportError(
            classifier
                .invalid_response(format!("unexpected response body: {}", e))
                .with_cause(e),
        ),
    }
}

/// Amounts are sent as strings with two decimals
pub fn format_amount(amount: f64) -> String {
    format!("{:.2}", amount)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimpleResponse {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub desc: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInfo {
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub approval_code: Option<String>,
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub amount: f64,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub card_number: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub resp_desc: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub resp_code: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub terminal: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub invoice: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settlement {
    #[serde(default, deserialize_with = "wire::f64_lenient")]
    pub amount: f64,
    #[serde(default)]
    pub count: u64,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub status: Option<String>,
}

/// Which invoice endpoint an [`InvoiceRequest`] goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceAction {
    Qr,
    Check,
    Cancel,
    CancelPayment,
}

/// Invoice by QR, check, invoice cancel and payment cancel share one body
#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    pub action: InvoiceAction,
    pub invoice: String,
    pub amount: f64,
}

fn signed_body(config: &ClientConfig, invoice: &str, amount: f64) -> mnpay_core::Result<Value> {
    let terminal = config.credential("terminal")?;
    let checksum = SignatureSigner::sign(&config.credential("secret")?, &[terminal.as_str(), invoice]);
    Ok(serde_json::json!({
        "amount": format_amount(amount),
        "invoice": invoice,
        "terminal": terminal,
        "checksum": checksum,
    }))
}

impl ProviderOperation for InvoiceRequest {
    type Output = Value;

    fn endpoint(&self) -> Endpoint {
        match self.action {
            InvoiceAction::Qr => INVOICE_QR,
            InvoiceAction::Check => INVOICE_CHECK,
            InvoiceAction::Cancel => INVOICE_CANCEL,
            InvoiceAction::CancelPayment => PAYMENT_CANCEL,
        }
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&signed_body(config, &self.invoice, self.amount)?))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Value> {
        parse_response(&response, classifier)
    }
}

/// Push an invoice to a customer's SocialPay app by phone number
#[derive(Debug, Clone)]
pub struct InvoicePhone {
    pub phone: String,
    pub invoice: String,
    pub amount: f64,
}

impl ProviderOperation for InvoicePhone {
    type Output = TransactionInfo;

    fn endpoint(&self) -> Endpoint {
        INVOICE_PHONE
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let mut body = signed_body(config, &self.invoice, self.amount)?;
        body["phone"] = Value::String(self.phone.clone());
        Ok(request.json(&body))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<TransactionInfo> {
        parse_response(&response, classifier)
    }
}

/// Settlement of the terminal's transactions for one batch
#[derive(Debug, Clone)]
pub struct Settle {
    pub settlement_id: String,
}

impl ProviderOperation for Settle {
    type Output = Settlement;

    fn endpoint(&self) -> Endpoint {
        SETTLEMENT
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        let terminal = config.credential("terminal")?;
        let checksum =
            SignatureSigner::sign(&config.credential("secret")?, &[&terminal, &self.settlement_id]);
        Ok(request.json(&serde_json::json!({
            "settlementId": self.settlement_id,
            "checksum": checksum,
            "terminal": terminal,
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Settlement> {
        parse_response(&response, classifier)
    }
}

/// Check an inbound transaction callback against `terminal ‖ invoice`
pub fn verify_callback(secret: &str, terminal: &str, transaction: &TransactionInfo) -> bool {
    match (&transaction.invoice, &transaction.checksum) {
        (Some(invoice), Some(checksum)) => {
            SignatureSigner::verify(secret, &[terminal, invoice.as_str()], checksum)
        }
        _ => false,
    }
}

/// SocialPay client for one terminal
#[derive(Debug, Clone)]
pub struct SocialPayClient {
    client: ProviderClient,
}

impl SocialPayClient {
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
        client.config().credential("terminal")?;
        client.config().credential("secret")?;
        Ok(Self {
            client: client.with_detector(detect_refusal),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    pub async fn invoice_phone(
        &self,
        phone: &str,
        invoice: &str,
        amount: f64,
    ) -> Result<TransactionInfo, ErrorEnvelope> {
        self.client
            .call(&InvoicePhone {
                phone: phone.to_string(),
                invoice: invoice.to_string(),
                amount,
            })
            .await
    }

    /// QR invoice; the response carries the QR payload
    pub async fn invoice_qr(&self, invoice: &str, amount: f64) -> Result<Value, ErrorEnvelope> {
        self.invoice(InvoiceAction::Qr, invoice, amount).await
    }

    pub async fn check_invoice(&self, invoice: &str, amount: f64) -> Result<TransactionInfo, ErrorEnvelope> {
        let value = self.invoice(InvoiceAction::Check, invoice, amount).await?;
        serde_json::from_value(value).map_err(|e| {
            self.client
                .classifier()
                .invalid_response(format!("unexpected transaction body: {}", e))
                .with_cause(e)
        })
    }

    pub async fn cancel_invoice(&self, invoice: &str, amount: f64) -> Result<SimpleResponse, ErrorEnvelope> {
        let value = self.invoice(InvoiceAction::Cancel, invoice, amount).await?;
        self.simple(value)
    }

    pub async fn cancel_payment(&self, invoice: &str, amount: f64) -> Result<SimpleResponse, ErrorEnvelope> {
        let value = self.invoice(InvoiceAction::CancelPayment, invoice, amount).await?;
        self.simple(value)
    }

    pub async fn settlement(&self, settlement_id: &str) -> Result<Settlement, ErrorEnvelope> {
        self.client
            .call(&Settle {
                settlement_id: settlement_id.to_string(),
            })
            .await
    }

    /// Verify a callback with this client's terminal and secret
    pub fn verify_callback(&self, transaction: &TransactionInfo) -> mnpay_core::Result<bool> {
        let config = self.client.config();
        Ok(verify_callback(
            &config.credential("secret")?,
            &config.credential("terminal")?,
            transaction,
        ))
    }

    async fn invoice(&self, action: InvoiceAction, invoice: &str, amount: f64) -> Result<Value, ErrorEnvelope> {
        self.client
            .call(&InvoiceRequest {
                action,
                invoice: invoice.to_string(),
                amount,
            })
            .await
    }

    fn simple(&self, value: Value) -> Result<SimpleResponse, ErrorEnvelope> {
        serde_json::from_value(value).map_err(|e| {
            self.client
                .classifier()
                .invalid_response(format!("unexpected response body: {}", e))
                .with_cause(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnpay_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_refusal_in_header() {
        let response = RawResponse::from_json(
            200,
            &json!({
                "header": {"status": "FAIL", "code": 400},
                "body": {"error": {"errorDesc": "Invoice not found", "errorType": "INVOICE"}}
            }),
        );
        let refusal = detect_refusal(&response).unwrap();
        assert_eq!(refusal.code, "400");
        assert_eq!(refusal.message.as_deref(), Some("Invoice not found"));
    }

    #[test]
    fn test_success_header_is_not_a_refusal() {
        let response = RawResponse::from_json(
            200,
            &json!({"header": {"status": "SUCCESS", "code": "200"}, "body": {"response": {}}}),
        );
        assert!(detect_refusal(&response).is_none());
        assert!(detect_refusal(&RawResponse::from_json(200, &json!({"other": 1}))).is_none());
    }

    #[test]
    fn test_parse_response_unwraps_body() {
        let response = RawResponse::from_json(
            200,
            &json!({
                "header": {"status": "SUCCESS", "code": 200},
                "body": {"response": {"amount": "1500.00", "count": 3, "status": "OK"}}
            }),
        );
        let parsed: Settlement = parse_response(&response, &ErrorClassifier::new(PROVIDER))
            .into_result()
            .unwrap();
        assert_eq!(parsed.amount, 1500.0);
        assert_eq!(parsed.count, 3);
    }

    #[test]
    fn test_parse_response_without_body_is_internal_error() {
        let response = RawResponse::from_json(200, &json!({"header": {"code": 200}}));
        let err = parse_response::<Settlement>(&response, &ErrorClassifier::new(PROVIDER))
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn test_verify_callback() {
        let checksum = SignatureSigner::sign("secret", &["T001", "INV-7"]);
        let mut transaction = TransactionInfo {
            approval_code: Some("A1".into()),
            amount: 1000.0,
            card_number: None,
            resp_desc: None,
            resp_code: Some("00".into()),
            terminal: Some("T001".into()),
            invoice: Some("INV-7".into()),
            checksum: Some(checksum.to_uppercase()),
        };
        assert!(verify_callback("secret", "T001", &transaction));
        assert!(!verify_callback("other", "T001", &transaction));

        transaction.invoice = Some("INV-8".into());
        assert!(!verify_callback("secret", "T001", &transaction));
        transaction.checksum = None;
        assert!(!verify_callback("secret", "T001", &transaction));
    }

    #[test]
    fn test_signed_body() {
        let config = ClientConfig::new("https://instore.golomtbank.com")
            .with_credential("terminal", "T001")
            .with_credential("secret", "k");
        let body = signed_body(&config, "INV-1", 1000.0).unwrap();
        assert_eq!(body["amount"], "1000.00");
        assert_eq!(body["terminal"], "T001");
        assert_eq!(body["checksum"], SignatureSigner::sign("k", &["T001INV-1"]).as_str());
    }
}
