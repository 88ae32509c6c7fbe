//! `classify`: run a status and body through a provider's detector and the
//! shared classifier, without any network traffic

use crate::cli::ClassifyArgs;
use crate::error::{Error, Result};
use crate::output::OutputWriter;
use mnpay_core::http::{BusinessErrorDetector, ErrorCodeRule, HeaderMap, Outcome, StatusCode};
use mnpay_core::{ErrorClassifier, ErrorEnvelope, RawResponse};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum Classification {
    /// 2xx without a business error code
    Success { status: u16 },
    Error(ErrorEnvelope),
}

pub fn handle_classify(args: ClassifyArgs, output: &mut OutputWriter) -> Result<()> {
    output.data(&classify(&args)?)
}

fn classify(args: &ClassifyArgs) -> Result<Classification> {
    let status = StatusCode::from_u16(args.status)
        .map_err(|_| Error::invalid_args(format!("{} is not an HTTP status", args.status)))?;
    let body = args.body.clone().unwrap_or_default();
    let response = RawResponse::new(status, HeaderMap::new(), body);

    let business = match mnpay_providers::detector_for(&args.provider) {
        Some(detector) => detector.detect(&response),
        None => {
            tracing::debug!(provider = %args.provider, "Unknown provider, using generic error-code rule");
            ErrorCodeRule::default().detect(&response)
        }
    };

    let classifier = ErrorClassifier::new(args.provider.as_str());
    let envelope = match &business {
        Some(error) => classifier.classify(&Outcome::Business {
            response: &response,
            error,
        }),
        None if response.is_success() => {
            return Ok(Classification::Success {
                status: args.status,
            })
        }
        None => classifier.classify(&Outcome::Response(&response)),
    };
    Ok(Classification::Error(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnpay_core::ErrorKind;

    fn args(status: u16, body: &str, provider: &str) -> ClassifyArgs {
        ClassifyArgs {
            status,
            body: Some(body.to_string()),
            provider: provider.to_string(),
        }
    }

    fn envelope(classification: Classification) -> ErrorEnvelope {
        match classification {
            Classification::Error(envelope) => envelope,
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn test_provider_rule_turns_success_into_payment_failed() {
        let result = classify(&args(200, r#"{"statusCode": 400, "message": "Insufficient balance"}"#, "tokipay"))
            .unwrap();
        let envelope = envelope(result);
        assert_eq!(envelope.kind(), ErrorKind::PaymentFailed);
        assert_eq!(envelope.provider_code(), Some("400"));
        assert_eq!(envelope.message(), "Insufficient balance");
    }

    #[test]
    fn test_status_wins_over_body_code_outside_2xx() {
        let result = classify(&args(503, r#"{"errorCode": "101"}"#, "golomt")).unwrap();
        assert_eq!(envelope(result).kind(), ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn test_plain_success() {
        let result = classify(&args(200, r#"{"invoiceId": "INV-1"}"#, "qpay")).unwrap();
        assert!(matches!(result, Classification::Success { status: 200 }));
    }

    #[test]
    fn test_unknown_provider_uses_generic_rule() {
        let result = classify(&args(200, r#"{"errorCode": "E1", "message": "nope"}"#, "acme")).unwrap();
        let envelope = envelope(result);
        assert_eq!(envelope.kind(), ErrorKind::PaymentFailed);
        assert_eq!(envelope.provider(), "acme");
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let err = classify(&args(1000, "{}", "qpay")).unwrap_err();
        assert!(err.should_show_help());
    }
}
