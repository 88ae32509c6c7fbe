//! MongolChat online QR payments
//!
//! Calls carry two static headers: `api-key` and
//! `Authorization: WorkerKey <key>`. Replies report `code`; `1000` is the
//! only success and any other value is a refusal described by `message`.
//!
//! Config credentials: `api_key`, `worker_key`, optionally `branch_no`.

use std::sync::Arc;

use mnpay_core::http::{ErrorCodeRule, HeaderAuth, RequestSpecBuilder, Transport};
use mnpay_core::{
    ClientAuth, ClientConfig, Endpoint, ErrorClassifier, ErrorEnvelope, Parsed, ProviderClient,
    ProviderOperation, RawResponse,
};
use serde::{Deserialize, Serialize};

pub const PROVIDER: &str = "mongolchat";

pub const QR_GENERATE: Endpoint = Endpoint::post("/worker/onlineqr/generate");
pub const QR_STATUS: Endpoint = Endpoint::post("/worker/onlineqr/status");

const SUCCESS_CODE: &str = "1000";

pub fn detector() -> ErrorCodeRule {
    ErrorCodeRule::new(&["code"], &[SUCCESS_CODE]).with_message_fields(&["message"])
}

/// `WorkerKey <key>` for the `Authorization` header
fn worker_key_header(worker_key: &str) -> String {
    format!("WorkerKey {}", worker_key)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_name: String,
    pub quantity: String,
    pub price: f64,
    pub tag: String,
}

/// Generate a QR the customer scans in the MongolChat app
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQr {
    pub amount: f64,
    /// Filled from the configured `branch_no` when empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub products: Vec<Product>,
    pub title: String,
    pub sub_title: String,
    pub noat: String,
    pub nhat: String,
    pub ttd: String,
    pub reference_number: String,
    pub expire_time: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedQr {
    pub qr: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProviderOperation for GenerateQr {
    type Output = GeneratedQr;

    fn endpoint(&self) -> Endpoint {
        QR_GENERATE
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        if self.branch_id.is_some() {
            return Ok(request.json(self));
        }
        let mut body = self.clone();
        body.branch_id = config.optional_credential("branch_no")?;
        Ok(request.json(&body))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<GeneratedQr> {
        Parsed::json(&response, classifier)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrStatus {
    pub status: String,
    /// Transaction id, present once paid
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub who_paid: Option<String>,
    #[serde(default)]
    pub user_ref_id: Option<String>,
}

impl QrStatus {
    pub fn is_paid(&self) -> bool {
        self.status.eq_ignore_ascii_case("paid")
    }
}

#[derive(Debug, Clone)]
pub struct CheckQr {
    pub qr: String,
}

impl ProviderOperation for CheckQr {
    type Output = QrStatus;

    fn endpoint(&self) -> Endpoint {
        QR_STATUS
    }

    fn prepare(
        &self,
        request: RequestSpecBuilder,
        _config: &ClientConfig,
    ) -> mnpay_core::Result<RequestSpecBuilder> {
        Ok(request.json(&serde_json::json!({ "qr": self.qr })))
    }

    fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<QrStatus> {
        Parsed::json(&response, classifier)
    }
}

/// MongolChat client authenticated with API and worker keys
#[derive(Debug, Clone)]
pub struct MongolchatClient {
    client: ProviderClient,
}

impl MongolchatClient {
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
        let auth = HeaderAuth::new()
            .with_header("api-key", config.credential("api_key")?)
            .with_header("Authorization", worker_key_header(&config.credential("worker_key")?));
        Ok(Self {
            client: client
                .with_auth(ClientAuth::Static(Arc::new(auth)))
                .with_detector(detector()),
        })
    }

    pub fn inner(&self) -> &ProviderClient {
        &self.client
    }

    pub async fn generate_qr(&self, input: &GenerateQr) -> Result<GeneratedQr, ErrorEnvelope> {
        self.client.call(input).await
    }

    pub async fn check_qr(&self, qr: &str) -> Result<QrStatus, ErrorEnvelope> {
        self.client.call(&CheckQr { qr: qr.to_string() }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnpay_core::http::BusinessErrorDetector;
    use serde_json::json;

    #[test]
    fn test_code_1000_is_the_only_success() {
        let ok = RawResponse::from_json(200, &json!({"code": 1000, "qr": "MCH-1", "message": "success"}));
        assert!(detector().detect(&ok).is_none());

        let refused = RawResponse::from_json(200, &json!({"code": 1003, "message": "Worker key invalid"}));
        let error = detector().detect(&refused).unwrap();
        assert_eq!(error.code, "1003");
        assert_eq!(error.message.as_deref(), Some("Worker key invalid"));
    }

    #[test]
    fn test_worker_key_scheme() {
        assert_eq!(worker_key_header("wk-1"), "WorkerKey wk-1");
    }

    #[test]
    fn test_branch_falls_back_to_config() {
        let config = ClientConfig::new("https://mgapi.mongolchat.mn")
            .with_credential("branch_no", "B-7");
        let spec = GenerateQr {
            amount: 500.0,
            reference_number: "REF-1".into(),
            ..Default::default()
        }
        .prepare(mnpay_core::RequestSpec::post("https://mgapi.mongolchat.mn/x"), &config)
        .unwrap()
        .build()
        .unwrap();
        let body: serde_json::Value = serde_json::from_slice(spec.body().unwrap()).unwrap();
        assert_eq!(body["branchId"], "B-7");
        assert_eq!(body["referenceNumber"], "REF-1");
    }
}
