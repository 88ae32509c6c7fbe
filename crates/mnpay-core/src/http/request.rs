//! Immutable request descriptions and their builder

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::Serialize;
use tokio::time::Instant;

use crate::http::auth::AuthHandler;
use crate::{Error, Result};

/// Per-attempt timeout used when a request does not set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One logical request: method, absolute URL, headers, optional body, and
/// the time bounds the executor enforces. Immutable once built.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl RequestSpec {
    /// Start building a request against an absolute URL
    pub fn builder(method: Method, url: &str) -> RequestSpecBuilder {
        let inner = Url::parse(url)
            .map_err(|e| Error::InvalidUrl {
                url: url.to_string(),
                message: e.to_string(),
            })
            .map(|url| RequestSpec {
                method,
                url,
                headers: HeaderMap::new(),
                body: None,
                timeout: DEFAULT_TIMEOUT,
                deadline: None,
            });
        RequestSpecBuilder { inner }
    }

    pub fn get(url: &str) -> RequestSpecBuilder {
        Self::builder(Method::GET, url)
    }

    pub fn post(url: &str) -> RequestSpecBuilder {
        Self::builder(Method::POST, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Look up a header value (case-insensitive) as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute bound on the whole call, backoff sleeps included
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Builder for [`RequestSpec`]. The first error encountered is kept and
/// reported by [`build`](RequestSpecBuilder::build).
#[derive(Debug)]
pub struct RequestSpecBuilder {
    inner: Result<RequestSpec>,
}

impl RequestSpecBuilder {
    fn and_then(self, f: impl FnOnce(RequestSpec) -> Result<RequestSpec>) -> Self {
        Self {
            inner: self.inner.and_then(f),
        }
    }

    /// Set a header, replacing any previous value
    pub fn header(self, name: &str, value: &str) -> Self {
        self.and_then(|mut spec| {
            let (name, value) = parse_header(name, value)?;
            spec.headers.insert(name, value);
            Ok(spec)
        })
    }

    /// Merge a prepared header map, replacing existing names
    pub fn headers(self, headers: HeaderMap) -> Self {
        self.and_then(|mut spec| {
            for (name, value) in headers.iter() {
                spec.headers.insert(name.clone(), value.clone());
            }
            Ok(spec)
        })
    }

    /// Append URL-encoded query parameters
    pub fn query(self, pairs: &[(&str, &str)]) -> Self {
        self.and_then(|mut spec| {
            spec.url.query_pairs_mut().extend_pairs(pairs);
            Ok(spec)
        })
    }

    /// Serialize `body` as the JSON request body
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Self {
        self.and_then(|spec| {
            let bytes = serde_json::to_vec(body)?;
            Ok(with_body(spec, bytes, HeaderValue::from_static("application/json")))
        })
    }

    /// Form-encoded (`application/x-www-form-urlencoded`) body
    pub fn form(self, pairs: &[(&str, &str)]) -> Self {
        self.and_then(|spec| {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            Ok(with_body(
                spec,
                encoded.into_bytes(),
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            ))
        })
    }

    /// Raw body with an explicit content type, e.g. `text/xml`
    pub fn body(self, body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        let body = body.into();
        self.and_then(|spec| {
            let content_type = HeaderValue::from_str(content_type)
                .map_err(|_| Error::request(format!("invalid content type '{}'", content_type)))?;
            Ok(with_body(spec, body, content_type))
        })
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer(self, token: &str) -> Self {
        self.and_then(|mut spec| {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| Error::request("token contains characters not allowed in a header"))?;
            value.set_sensitive(true);
            spec.headers.insert(AUTHORIZATION, value);
            Ok(spec)
        })
    }

    /// Apply a static auth handler
    pub fn auth(self, handler: &dyn AuthHandler) -> Self {
        self.and_then(|mut spec| {
            handler.apply_auth(&mut spec.headers)?;
            Ok(spec)
        })
    }

    /// Per-attempt timeout
    pub fn timeout(self, timeout: Duration) -> Self {
        self.and_then(|mut spec| {
            spec.timeout = timeout;
            Ok(spec)
        })
    }

    /// Absolute deadline for the whole logical call
    pub fn deadline(self, deadline: Instant) -> Self {
        self.and_then(|mut spec| {
            spec.deadline = Some(deadline);
            Ok(spec)
        })
    }

    pub fn build(self) -> Result<RequestSpec> {
        self.inner
    }
}

/// Join a provider endpoint and an operation path with exactly one slash,
/// keeping any path prefix the endpoint already has (`/v2`).
pub fn join_url(endpoint: &str, path: &str) -> String {
    if path.is_empty() {
        return endpoint.to_string();
    }
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn with_body(mut spec: RequestSpec, body: Vec<u8>, content_type: HeaderValue) -> RequestSpec {
    spec.headers.insert(CONTENT_TYPE, content_type);
    spec.body = Some(body);
    spec
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::request(format!("invalid header name '{}'", name)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| Error::request(format!("invalid value for header '{}'", name)))?;
    Ok((header_name, header_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::auth::BasicAuth;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let spec = RequestSpec::get("https://merchant.qpay.mn/v2/invoice/INV-1")
            .build()
            .unwrap();
        assert_eq!(spec.method(), &Method::GET);
        assert_eq!(spec.timeout(), DEFAULT_TIMEOUT);
        assert!(spec.body().is_none());
        assert!(spec.deadline().is_none());
    }

    #[test]
    fn test_invalid_url_is_reported_at_build() {
        let err = RequestSpec::post("not a url")
            .header("x-a", "b")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let spec = RequestSpec::get("https://example.mn")
            .header("X-Api-Key", "k1")
            .build()
            .unwrap();
        assert_eq!(spec.header("x-api-key"), Some("k1"));
    }

    #[test]
    fn test_invalid_header_fails_build() {
        let result = RequestSpec::get("https://example.mn")
            .header("bad name", "v")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let spec = RequestSpec::post("https://example.mn/invoice")
            .json(&json!({"amount": 100}))
            .build()
            .unwrap();
        assert_eq!(spec.header("content-type"), Some("application/json"));
        assert_eq!(spec.body().unwrap(), br#"{"amount":100}"#);
    }

    #[test]
    fn test_form_and_query_encoding() {
        let spec = RequestSpec::post("https://example.mn/oauth/token")
            .query(&[("grant_type", "password"), ("username", "a b")])
            .form(&[("client_id", "id&1")])
            .build()
            .unwrap();
        assert_eq!(
            spec.url().as_str(),
            "https://example.mn/oauth/token?grant_type=password&username=a+b"
        );
        assert_eq!(spec.body().unwrap(), b"client_id=id%261");
        assert_eq!(
            spec.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_raw_xml_body() {
        let spec = RequestSpec::post("https://example.mn/xml")
            .body("<Document/>", "text/xml; charset=utf-8")
            .build()
            .unwrap();
        assert_eq!(spec.header("content-type"), Some("text/xml; charset=utf-8"));
    }

    #[test]
    fn test_bearer_and_auth_handler() {
        let spec = RequestSpec::get("https://example.mn")
            .bearer("tok")
            .build()
            .unwrap();
        assert_eq!(spec.header("authorization"), Some("Bearer tok"));

        let spec = RequestSpec::get("https://example.mn")
            .auth(&BasicAuth::new("u", "p"))
            .build()
            .unwrap();
        assert!(spec.header("authorization").unwrap().starts_with("Basic "));
    }

    #[test]
    fn test_join_url_keeps_prefix() {
        assert_eq!(
            join_url("https://merchant.qpay.mn/v2/", "/auth/token"),
            "https://merchant.qpay.mn/v2/auth/token"
        );
        assert_eq!(join_url("https://a.mn", "b"), "https://a.mn/b");
        assert_eq!(join_url("https://a.mn/x", ""), "https://a.mn/x");
    }
}
