//! QPay Quick merchant onboarding and invoices
//!
//! Same token endpoints as [`crate::qpay`], except the login body names the
//! merchant terminal (`{"terminal_id": ...}`). The cache keeps its own
//! credential with the 12 hour QPay margin. Merchants (companies or persons)
//! are registered first; invoices are then issued on their behalf.
//!
//! Config credentials: `username`, `password`, `terminal_id`.

use std::borrow::Cow;
use std::sync::Arc;

use mnpay_core::http::{RequestSpecBuilder, Transport};
use mnpay_core::{
    ClientAuth, ClientConfig, Credential, CredentialCache, Endpoint, ErrorClassifier,
    ErrorEnvelope, Parsed, ProviderClient, ProviderOperation, RawResponse,
};
use serde::{Deserialize, Serialize};

use crate::qpay::{QpayTokens, DEFAULT_TOKEN_MARGIN};
use crate::wire;

pub const PROVIDER: &str = "qpay-quick";

pub const CREATE_COMPANY: Endpoint = Endpoint::post("/merchant/company");
pub const CREATE_PERSON: Endpoint = Endpoint::post("/merchant/person");
pub const MERCHANT_GET: Endpoint = Endpoint::get("/merchant/");
pub const MERCHANT_LIST: Endpoint = Endpoint::post("/merchant/list");
pub const INVOICE_CREATE: Endpoint = Endpoint::post("/invoice");
pub const INVOICE_GET: Endpoint = Endpoint::get("/invoice/");
pub const PAYMENT_CHECK: Endpoint = Endpoint::post("/payment/check");

/// Register a company as a merchant
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCompany {
    pub owner_reg_no: String,
    pub owner_first_name: String,
    pub owner_last_name: String,
    pub location_lat: String,
    pub location_lng: String,
    pub register_no: String,
    pub name: String,
    pub mcc_code: String,
    pub city: String,
    pub district: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

/// Register an individual as a merchant
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPerson {
    pub register_no: String,
    pub first_name: String,
    pub last_name: String,
    pub mcc_code: String,
    pub city: String,
    pub district: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

/// A registered merchant; company and person share this shape
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merchant {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub register_no: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub mcc_code: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub create_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MerchantPage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub items: Vec<Merchant>,
}

impl ProviderOperation for NewCompany {
    type Output = Merchant;

    fn endpoint(&self) -> Endpoint {
        CREATE_COMPANY
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Merchant> {
        Parsed::json(&response, classifier)
    }
}

impl ProviderOperation for NewPerson {
    type Output = Merchant;

    fn endpoint(&self) -> Endpoint {
        CREATE_PERSON
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Merchant> {
        Parsed::json(&response, classifier)
    }
}

/// `GET /merchant/{id}`
#[derive(Debug, Clone)]
pub struct GetMerchant {
    pub merchant_id: String,
}

impl ProviderOperation for GetMerchant {
    type Output = Merchant;

    fn endpoint(&self) -> Endpoint {
        MERCHANT_GET
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", MERCHANT_GET.path, self.merchant_id))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Merchant> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone)]
pub struct ListMerchants {
    pub page_number: u32,
    pub page_limit: u32,
}

impl ProviderOperation for ListMerchants {
    type Output = MerchantPage;

    fn endpoint(&self) -> Endpoint {
        MERCHANT_LIST
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&serde_json::json!({
            "offset": {
                "pageNumber": self.page_number,
                "pageLimit": self.page_limit,
            },
        })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<MerchantPage> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub account_bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub is_default: bool,
}

/// Invoice issued for a registered merchant
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoice {
    pub merchant_id: String,
    pub branch_code: String,
    pub amount: f64,
    pub currency: String,
    pub customer_name: String,
    pub customer_logo: String,
    pub callback_url: String,
    pub description: String,
    pub mcc_code: String,
    pub bank_accounts: Vec<BankAccount>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvoiceLink {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickInvoice {
    pub id: String,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub amount: Option<String>,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub qr_image: Option<String>,
    #[serde(default)]
    pub invoice_status: Option<String>,
    #[serde(default)]
    pub invoice_status_date: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Bank app deeplinks; absent on `GET /invoice/{id}`
    #[serde(default)]
    pub urls: Vec<InvoiceLink>,
}

impl ProviderOperation for CreateInvoice {
    type Output = QuickInvoice;

    fn endpoint(&self) -> Endpoint {
        INVOICE_CREATE
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(self))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<QuickInvoice> {
        Parsed::json(&response, classifier)
    }
}

/// `GET /invoice/{id}`
#[derive(Debug, Clone)]
pub struct GetInvoice {
    pub invoice_id: String,
}

impl ProviderOperation for GetInvoice {
    type Output = QuickInvoice;

    fn endpoint(&self) -> Endpoint {
        INVOICE_GET
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}{}", INVOICE_GET.path, self.invoice_id))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<QuickInvoice> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickPayment {
    pub id: String,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub amount: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_status_date: Option<String>,
    #[serde(default)]
    pub paid_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePayments {
    pub id: String,
    #[serde(default)]
    pub invoice_status: Option<String>,
    #[serde(default)]
    pub invoice_status_date: Option<String>,
    #[serde(default)]
    pub payments: Vec<QuickPayment>,
}

impl InvoicePayments {
    pub fn is_paid(&self) -> bool {
        self.invoice_status.as_deref() == Some("PAID")
            || self
                .payments
                .iter()
                .any(|payment| payment.payment_status.as_deref() == Some("PAID"))
    }
}

#[derive(Debug, Clone)]
pub struct CheckPayment {
    pub invoice_id: String,
}

impl ProviderOperation for CheckPayment {
    type Output = InvoicePayments;

    fn endpoint(&self) -> Endpoint {
        PAYMENT_CHECK
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&serde_json::json!({ "invoiceId": self.invoice_id })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<InvoicePayments> {
        Parsed::json(&response, classifier)
    }
}

/// QPay Quick client with its own cached bearer token
#[derive(Debug, Clone)]
pub struct QpayQuickClient {
    client: ProviderClient,
}

impl QpayQuickClient {
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
        let tokens = QpayTokens::from_config(config)?.with_terminal_id(config.credential("terminal_id")?);
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
            None => Err(self
                .client
                .classifier()
                .invalid_request("qpay-quick client has no token cache")),
        }
    }

    pub async fn create_company(&self, input: &NewCompany) -> Result<Merchant, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn create_person(&self, input: &NewPerson) -> Result<Merchant, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn get_merchant(&self, merchant_id: &str) -> Result<Merchant, ErrorEnvelope> {
        self.client
            .call(&GetMerchant {
                merchant_id: merchant_id.to_string(),
            })
            .await
    }

    pub async fn list_merchants(&self, page_number: u32, page_limit: u32) -> Result<MerchantPage, ErrorEnvelope> {
        self.client
            .call(&ListMerchants {
                page_number,
                page_limit,
            })
            .await
    }

    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<QuickInvoice, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> Result<QuickInvoice, ErrorEnvelope> {
        self.client
            .call(&GetInvoice {
                invoice_id: invoice_id.to_string(),
            })
            .await
    }

    pub async fn check_payment(&self, invoice_id: &str) -> Result<InvoicePayments, ErrorEnvelope> {
        self.client
            .call(&CheckPayment {
                invoice_id: invoice_id.to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_terminal_id_fails_construction() {
        let config = ClientConfig::new("https://quickqr.qpay.mn/v2")
            .with_credential("username", "QUICK")
            .with_credential("password", "pass");
        assert!(QpayQuickClient::new(config).is_err());
    }

    #[test]
    fn test_company_body_is_camel_case() {
        let company = NewCompany {
            owner_reg_no: "AA00112233".into(),
            register_no: "1234567".into(),
            name: "Coffee LLC".into(),
            mcc_code: "5814".into(),
            ..Default::default()
        };
        let body = serde_json::to_value(&company).unwrap();
        assert_eq!(body["ownerRegNo"], "AA00112233");
        assert_eq!(body["registerNo"], "1234567");
        assert_eq!(body["mccCode"], "5814");
    }

    #[test]
    fn test_invoice_amount_may_be_string() {
        let invoice: QuickInvoice = serde_json::from_value(json!({
            "id": "QI-1",
            "amount": "1500.00",
            "qrCode": "000201",
            "invoiceStatus": "OPEN",
        }))
        .unwrap();
        assert_eq!(invoice.amount.as_deref(), Some("1500.00"));
        assert!(invoice.urls.is_empty());
    }

    #[test]
    fn test_paid_by_invoice_or_payment_status() {
        let open: InvoicePayments = serde_json::from_value(json!({
            "id": "QI-1",
            "invoiceStatus": "OPEN",
            "payments": [{"id": "P1", "paymentStatus": "PAID"}]
        }))
        .unwrap();
        assert!(open.is_paid());

        let unpaid: InvoicePayments =
            serde_json::from_value(json!({"id": "QI-2", "invoiceStatus": "OPEN"})).unwrap();
        assert!(!unpaid.is_paid());
    }
}
