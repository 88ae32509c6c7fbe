//! Per-provider client configuration
//!
//! Every provider client recognises the same flat option set: an endpoint,
//! a map of named credentials, an optional callback URL and the timing knobs.
//! Credential values may reference the environment as `${ENV:NAME}`.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::{expand_env_vars, join_url, RetryPolicy, TlsConfig, TransportConfig};
use crate::{Error, Result};

/// Configuration for one provider client
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://merchant.qpay.mn/v2`
    pub endpoint: String,
    /// Named credentials (`username`, `password`, `secret`, `terminal`, ...)
    pub credentials: BTreeMap<String, String>,
    pub callback_url: Option<String>,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Total number of physical attempts per call
    pub max_retries: u32,
    /// Linear backoff unit in milliseconds
    pub retry_delay_ms: u64,
    /// Token safety margin; providers fall back to their own default
    pub token_margin_secs: Option<u64>,
    pub tls: Option<TlsConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credentials: BTreeMap::new(),
            callback_url: None,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            token_margin_secs: None,
            tls: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credentials: Vec<&str> = self.credentials.keys().map(String::as_str).collect();
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("credentials", &credentials)
            .field("callback_url", &self.callback_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("token_margin_secs", &self.token_margin_secs)
            .field("tls", &self.tls)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_credential(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(name.into(), value.into());
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Read `PREFIX_*` variables from the process environment
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Build from an explicit set of variables.
    ///
    /// Recognised: `PREFIX_ENDPOINT`, `PREFIX_CALLBACK_URL`,
    /// `PREFIX_TIMEOUT_MS`, `PREFIX_MAX_RETRIES`, `PREFIX_RETRY_DELAY_MS`,
    /// `PREFIX_TOKEN_MARGIN_SECS` and `PREFIX_CREDENTIAL_<NAME>`.
    pub fn from_vars<I>(prefix: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{}_", prefix.trim_end_matches('_').to_uppercase());
        let credential_prefix = format!("{}CREDENTIAL_", prefix);
        let mut config = Self::default();

        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(&credential_prefix) {
                config.credentials.insert(name.to_lowercase(), value);
                continue;
            }
            let Some(option) = key.strip_prefix(&prefix) else {
                continue;
            };
            match option {
                "ENDPOINT" => config.endpoint = value,
                "CALLBACK_URL" => config.callback_url = Some(value),
                "TIMEOUT_MS" => config.timeout_ms = parse_number(&key, &value)?,
                "MAX_RETRIES" => config.max_retries = parse_number(&key, &value)?,
                "RETRY_DELAY_MS" => config.retry_delay_ms = parse_number(&key, &value)?,
                "TOKEN_MARGIN_SECS" => config.token_margin_secs = Some(parse_number(&key, &value)?),
                _ => {}
            }
        }
        Ok(config)
    }

    /// Check the options that every provider client relies on
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint).map_err(|e| Error::InvalidUrl {
            url: self.endpoint.clone(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl {
                url: self.endpoint.clone(),
                message: "endpoint must use http or https".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(Error::config("timeout_ms must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(Error::config("max_retries must be at least 1"));
        }
        if let Some(tls) = &self.tls {
            tls.validate().map_err(|e| Error::Tls {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })?;
        }
        Ok(())
    }

    /// A required credential, with `${ENV:NAME}` placeholders expanded
    pub fn credential(&self, name: &str) -> Result<String> {
        self.optional_credential(name)?
            .ok_or_else(|| Error::missing_credential(name))
    }

    /// An optional credential; empty values count as absent
    pub fn optional_credential(&self, name: &str) -> Result<Option<String>> {
        match self.credentials.get(name) {
            Some(raw) => {
                let value = expand_env_vars(raw)?;
                Ok((!value.is_empty()).then_some(value))
            }
            None => Ok(None),
        }
    }

    /// Absolute URL for an operation path under the endpoint
    pub fn url(&self, path: &str) -> String {
        join_url(&self.endpoint, path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries).with_base_delay(Duration::from_millis(self.retry_delay_ms))
    }

    /// Token margin, or `default` when the config does not set one
    pub fn token_margin(&self, default: Duration) -> Duration {
        self.token_margin_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Transport settings derived from this config
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: self.timeout().max(TransportConfig::default().connect_timeout),
            tls: self.tls.clone().unwrap_or_default(),
            ..TransportConfig::default()
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{} must be a number, got '{}'", key, value)))
}
