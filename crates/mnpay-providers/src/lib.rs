//! mnpay providers - payment-provider adapters built on `mnpay-core`
//!
//! Each module maps one provider's REST API onto [`ProviderOperation`]s and
//! wraps them in a client that owns the provider's auth scheme and
//! business-error detector:
//!
//! | Module        | Auth                                   | Refusal signal              |
//! |---------------|----------------------------------------|-----------------------------|
//! | [`qpay`]        | cached bearer (Basic login + refresh)  | HTTP status                 |
//! | [`qpay_quick`]  | cached bearer, terminal id at login    | HTTP status                 |
//! | [`golomt`]      | static bearer, HMAC checksum           | `errorCode != "000"`        |
//! | [`socialpay`]   | HMAC checksum in body                  | `header.code != 200`        |
//! | [`storepay`]    | cached bearer (password grant)         | `status != "Success"`       |
//! | [`khanbank`]    | credentials in body                    | `ErrorCode` present         |
//! | [`monpay`]      | Basic, or cached client-credentials    | `code != 0`                 |
//! | [`tokipay`]     | merchant key headers                   | `statusCode != 200`         |
//! | [`hipay`]       | static bearer                          | `code != 1`                 |
//! | [`mongolchat`]  | `api-key` + `WorkerKey` headers        | `code != 1000`              |
//! | [`upoint`]      | `Token` authorization header           | `result != 0`               |
//!
//! [`ProviderOperation`]: mnpay_core::ProviderOperation

pub mod golomt;
pub mod hipay;
pub mod khanbank;
pub mod mongolchat;
pub mod monpay;
pub mod qpay;
pub mod qpay_quick;
pub mod socialpay;
pub mod storepay;
pub mod tokipay;
pub mod upoint;

mod wire;

use mnpay_core::http::{BusinessErrorDetector, NoBusinessErrors};

pub use golomt::GolomtClient;
pub use hipay::HipayClient;
pub use khanbank::KhanBankClient;
pub use mongolchat::MongolchatClient;
pub use monpay::{MonpayClient, MonpayDeeplinkClient};
pub use qpay::QpayClient;
pub use qpay_quick::QpayQuickClient;
pub use socialpay::SocialPayClient;
pub use storepay::StorepayClient;
pub use tokipay::TokipayClient;
pub use upoint::UpointClient;

/// Names accepted by [`detector_for`]
pub const PROVIDERS: [&str; 11] = [
    golomt::PROVIDER,
    hipay::PROVIDER,
    khanbank::PROVIDER,
    mongolchat::PROVIDER,
    monpay::PROVIDER,
    qpay::PROVIDER,
    qpay_quick::PROVIDER,
    socialpay::PROVIDER,
    storepay::PROVIDER,
    tokipay::PROVIDER,
    upoint::PROVIDER,
];

/// The business-error detector a provider's client installs
pub fn detector_for(provider: &str) -> Option<Box<dyn BusinessErrorDetector>> {
    let detector: Box<dyn BusinessErrorDetector> = match provider {
        golomt::PROVIDER => Box::new(golomt::detector()),
        hipay::PROVIDER => Box::new(hipay::detect_refusal),
        khanbank::PROVIDER => Box::new(khanbank::detector()),
        mongolchat::PROVIDER => Box::new(mongolchat::detector()),
        monpay::PROVIDER => Box::new(monpay::detector()),
        qpay::PROVIDER | qpay_quick::PROVIDER => Box::new(NoBusinessErrors),
        socialpay::PROVIDER => Box::new(socialpay::detect_refusal),
        storepay::PROVIDER => Box::new(storepay::detect_refusal),
        tokipay::PROVIDER => Box::new(tokipay::detector()),
        upoint::PROVIDER => Box::new(upoint::detector()),
        _ => return None,
    };
    Some(detector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnpay_core::RawResponse;
    use serde_json::json;

    #[test]
    fn test_every_provider_has_a_detector() {
        for name in PROVIDERS {
            assert!(detector_for(name).is_some(), "{}", name);
        }
        assert!(detector_for("unknown").is_none());
    }

    #[test]
    fn test_detectors_differ_per_provider() {
        let body = RawResponse::from_json(200, &json!({"code": 5, "info": "Branch not found"}));
        assert!(detector_for("monpay").unwrap().detect(&body).is_some());
        assert!(detector_for("qpay").unwrap().detect(&body).is_none());
    }

    #[test]
    fn test_success_codes_are_provider_specific() {
        let hipay_ok = RawResponse::from_json(200, &json!({"code": 1, "description": "success"}));
        assert!(detector_for("hipay").unwrap().detect(&hipay_ok).is_none());
        assert!(detector_for("mongolchat").unwrap().detect(&hipay_ok).is_some());

        let mongolchat_ok = RawResponse::from_json(200, &json!({"code": 1000, "message": "success"}));
        assert!(detector_for("mongolchat").unwrap().detect(&mongolchat_ok).is_none());
        assert!(detector_for("hipay").unwrap().detect(&mongolchat_ok).is_some());
    }
}
