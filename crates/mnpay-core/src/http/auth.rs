//! Authentication handling for provider APIs
//!
//! Supports the static schemes providers use:
//! - HTTP Basic (merchant username/password, or app id/secret)
//! - static Bearer tokens
//! - API keys in custom headers, with `${ENV:NAME}` expansion
//!
//! Cached OAuth-style tokens are handled by [`CredentialCache`](crate::CredentialCache).

use std::fmt;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::{Error, Result};

/// Trait for handling provider-specific authentication
pub trait AuthHandler: Send + Sync + fmt::Debug {
    /// Apply authentication to request headers
    fn apply_auth(&self, headers: &mut HeaderMap) -> Result<()>;

    /// Validate that required credentials are available
    fn validate_credentials(&self) -> Result<()>;
}

/// HTTP Basic authentication
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `Authorization` header value, `Basic base64(user:pass)`
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl AuthHandler for BasicAuth {
    fn apply_auth(&self, headers: &mut HeaderMap) -> Result<()> {
        self.validate_credentials()?;
        headers.insert(AUTHORIZATION, sensitive_value(&self.header_value())?);
        Ok(())
    }

    fn validate_credentials(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::missing_credential("username"));
        }
        Ok(())
    }
}

/// Static bearer token authentication
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl AuthHandler for BearerAuth {
    fn apply_auth(&self, headers: &mut HeaderMap) -> Result<()> {
        self.validate_credentials()?;
        headers.insert(
            AUTHORIZATION,
            sensitive_value(&format!("Bearer {}", self.token))?,
        );
        Ok(())
    }

    fn validate_credentials(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(Error::missing_credential("token"));
        }
        Ok(())
    }
}

/// API keys sent in custom headers, values may contain `${ENV:NAME}`
#[derive(Clone, Default)]
pub struct HeaderAuth {
    headers: Vec<(String, String)>,
}

impl HeaderAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header; the value is expanded when the header is applied
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Debug for HeaderAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("HeaderAuth").field("headers", &names).finish()
    }
}

impl AuthHandler for HeaderAuth {
    fn apply_auth(&self, headers: &mut HeaderMap) -> Result<()> {
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::request(format!("invalid header name '{}'", name)))?;
            headers.insert(name, sensitive_value(&expand_env_vars(value)?)?);
        }
        Ok(())
    }

    fn validate_credentials(&self) -> Result<()> {
        for (name, value) in &self.headers {
            if expand_env_vars(value)?.is_empty() {
                return Err(Error::missing_credential(name));
            }
        }
        Ok(())
    }
}

/// Expand environment variables in the format `${ENV:VAR_NAME}`
pub fn expand_env_vars(value: &str) -> Result<String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$\{ENV:([^}]+)\}").expect("valid placeholder pattern"));

    let mut result = value.to_string();
    for cap in re.captures_iter(value) {
        let var_name = &cap[1];
        let env_value = std::env::var(var_name).map_err(|_| {
            Error::config(format!("environment variable {} not found", var_name))
        })?;
        result = result.replace(&cap[0], &env_value);
    }
    Ok(result)
}

fn sensitive_value(value: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| Error::request("credential contains characters not allowed in a header"))?;
    header.set_sensitive(true);
    Ok(header)
}
