//! Detection of business-level error codes embedded in response bodies
//!
//! Several providers answer with HTTP 200 and put the real verdict in a code
//! field (`"errorCode": "005"`). Such responses must never be retried, so the
//! executor asks a [`BusinessErrorDetector`] about every response it receives.

use serde_json::Value;

use crate::http::response::RawResponse;

/// A provider error code found in a response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessError {
    pub code: String,
    pub message: Option<String>,
    /// Correlation value from the body (order number, transaction id)
    pub reference: Option<String>,
}

impl BusinessError {
    pub fn new(code: impl Into<String>, message: Option<String>) -> Self {
        Self {
            code: code.into(),
            message,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Decides whether a response body carries a provider error code
pub trait BusinessErrorDetector: Send + Sync {
    fn detect(&self, response: &RawResponse) -> Option<BusinessError>;
}

impl<F> BusinessErrorDetector for F
where
    F: Fn(&RawResponse) -> Option<BusinessError> + Send + Sync,
{
    fn detect(&self, response: &RawResponse) -> Option<BusinessError> {
        self(response)
    }
}

/// Detector for providers whose bodies never carry error codes
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBusinessErrors;

impl BusinessErrorDetector for NoBusinessErrors {
    fn detect(&self, _response: &RawResponse) -> Option<BusinessError> {
        None
    }
}

/// Generic error-code heuristic over top-level JSON object fields
#[derive(Debug, Clone)]
pub struct ErrorCodeRule {
    code_fields: Vec<String>,
    success_codes: Vec<String>,
    message_fields: Vec<String>,
    reference_fields: Vec<String>,
}

impl Default for ErrorCodeRule {
    fn default() -> Self {
        Self {
            code_fields: to_strings(&["errorCode", "ErrorCode", "error_code"]),
            success_codes: to_strings(&["000", "0", ""]),
            message_fields: to_strings(&["errorDesc", "ErrorMessage", "message", "error"]),
            reference_fields: Vec::new(),
        }
    }
}

impl ErrorCodeRule {
    /// Rule with custom code fields and success codes, default message fields
    pub fn new(code_fields: &[&str], success_codes: &[&str]) -> Self {
        Self {
            code_fields: to_strings(code_fields),
            success_codes: to_strings(success_codes),
            ..Self::default()
        }
    }

    /// Replace the fields searched, in order, for a message
    pub fn with_message_fields(mut self, fields: &[&str]) -> Self {
        self.message_fields = to_strings(fields);
        self
    }

    /// Fields searched, in order, for a correlation reference
    pub fn with_reference_fields(mut self, fields: &[&str]) -> Self {
        self.reference_fields = to_strings(fields);
        self
    }
}

impl BusinessErrorDetector for ErrorCodeRule {
    fn detect(&self, response: &RawResponse) -> Option<BusinessError> {
        let body = response.json_value()?;
        let object = body.as_object()?;

        let code = self.code_fields.iter().find_map(|field| match object.get(field) {
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })?;

        if self.success_codes.iter().any(|ok| *ok == code) {
            return None;
        }

        let message = self
            .message_fields
            .iter()
            .find_map(|field| match object.get(field) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            });

        let reference = self
            .reference_fields
            .iter()
            .find_map(|field| match object.get(field) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            });

        Some(BusinessError {
            code,
            message,
            reference,
        })
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_rule_detects_error_code() {
        let response =
            RawResponse::from_json(200, &json!({"errorCode": "005", "errorDesc": "insufficient"}));
        let found = ErrorCodeRule::default().detect(&response).unwrap();
        assert_eq!(found.code, "005");
        assert_eq!(found.message.as_deref(), Some("insufficient"));
    }

    #[test]
    fn test_success_codes_are_not_errors() {
        let rule = ErrorCodeRule::default();
        for body in [
            json!({"errorCode": "000", "errorDesc": "Success"}),
            json!({"ErrorCode": "0"}),
            json!({"ErrorCode": 0}),
            json!({"invoice": "INV-1"}),
            json!([1, 2, 3]),
        ] {
            assert!(rule.detect(&RawResponse::from_json(200, &body)).is_none(), "{}", body);
        }
    }

    #[test]
    fn test_numeric_codes_and_capitalised_fields() {
        let response =
            RawResponse::from_json(200, &json!({"ErrorCode": 7, "ErrorMessage": "Order not found"}));
        let found = ErrorCodeRule::default().detect(&response).unwrap();
        assert_eq!(found.code, "7");
        assert_eq!(found.message.as_deref(), Some("Order not found"));
    }

    #[test]
    fn test_custom_rule() {
        let rule = ErrorCodeRule::new(&["status"], &["Success"]).with_message_fields(&["detail"]);
        let failed = RawResponse::from_json(200, &json!({"status": "Failed", "detail": "no limit"}));
        assert_eq!(rule.detect(&failed).unwrap().message.as_deref(), Some("no limit"));

        let ok = RawResponse::from_json(200, &json!({"status": "Success"}));
        assert!(rule.detect(&ok).is_none());
    }

    #[test]
    fn test_reference_fields() {
        let rule = ErrorCodeRule::default().with_reference_fields(&["OrderNumber"]);
        let response = RawResponse::from_json(
            200,
            &json!({"ErrorCode": "5", "ErrorMessage": "Access denied", "OrderNumber": "ORD-9"}),
        );
        let found = rule.detect(&response).unwrap();
        assert_eq!(found.reference.as_deref(), Some("ORD-9"));

        let bare = RawResponse::from_json(200, &json!({"ErrorCode": "5"}));
        assert_eq!(rule.detect(&bare).unwrap().reference, None);
    }

    #[test]
    fn test_closure_detector() {
        let detector = |response: &RawResponse| {
            (response.text() == "FAIL").then(|| BusinessError::new("FAIL", None))
        };
        let response = RawResponse::new(
            reqwest::StatusCode::OK,
            reqwest::header::HeaderMap::new(),
            "FAIL",
        );
        assert!(detector.detect(&response).is_some());
        assert!(NoBusinessErrors.detect(&response).is_none());
    }
}
