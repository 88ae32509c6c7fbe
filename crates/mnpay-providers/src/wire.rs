//! Lenient field decoding shared by the adapters
//!
//! Provider bodies are loosely typed: amounts and codes arrive as strings on
//! one endpoint and as numbers on the next.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// String, number or boolean rendered as a string; null and absent are `None`
pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Number or numeric string; anything unparseable reads as zero
pub fn f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    })
}

/// Numeric string or integer code, e.g. an HTTP-like status in a body
pub fn code<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("code is not an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("code '{}' is not numeric", s))),
        other => Err(serde::de::Error::custom(format!("unexpected code {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "opt_string")]
        amount: Option<String>,
        #[serde(default, deserialize_with = "f64_lenient")]
        total: f64,
    }

    #[test]
    fn test_strings_and_numbers() {
        let a: Sample = serde_json::from_value(json!({"amount": 100, "total": "12.5"})).unwrap();
        assert_eq!(a.amount.as_deref(), Some("100"));
        assert_eq!(a.total, 12.5);

        let b: Sample = serde_json::from_value(json!({"amount": "100.00", "total": 3})).unwrap();
        assert_eq!(b.amount.as_deref(), Some("100.00"));
        assert_eq!(b.total, 3.0);

        let c: Sample = serde_json::from_value(json!({"amount": null})).unwrap();
        assert_eq!(c.amount, None);
        assert_eq!(c.total, 0.0);
    }

    #[test]
    fn test_code() {
        #[derive(Deserialize)]
        struct Header {
            #[serde(deserialize_with = "code")]
            code: i64,
        }
        let from_number: Header = serde_json::from_value(json!({"code": 200})).unwrap();
        let from_string: Header = serde_json::from_value(json!({"code": "401"})).unwrap();
        assert_eq!(from_number.code, 200);
        assert_eq!(from_string.code, 401);
        assert!(serde_json::from_value::<Header>(json!({"code": "ok"})).is_err());
    }
}
