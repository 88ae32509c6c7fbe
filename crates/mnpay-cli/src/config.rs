//! Configuration management for the CLI
//!
//! Configuration comes from, in order of precedence:
//! - the file named by `--config` / `MNPAY_CONFIG`
//! - the first file found in the default search paths
//! - `MNPAY_<PROVIDER>_*` environment variables, per provider

use crate::error::{Error, Result};
use mnpay_core::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider clients keyed by name (`qpay`, `storepay`, ...)
    pub providers: BTreeMap<String, ClientConfig>,

    pub output: OutputConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub color: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when no `-v` flag is given
    pub level: Option<String>,

    /// Log format (compact, full, json)
    pub format: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { color: true }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(Error::InvalidFormat {
                path: path.to_path_buf(),
                expected: "YAML or JSON".to_string(),
            }),
        }
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        for path in Self::default_config_paths() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading configuration file");
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file or default locations
    pub fn load_with_file(file: Option<&Path>) -> Result<Self> {
        match file {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }

    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("mnpay.yaml"),
            PathBuf::from("mnpay.json"),
            PathBuf::from(".mnpay.yaml"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            let mnpay_dir = config_dir.join("mnpay");
            paths.push(mnpay_dir.join("config.yaml"));
            paths.push(mnpay_dir.join("config.json"));
        }

        paths
    }

    /// Client configuration for a provider
    ///
    /// Falls back to `MNPAY_<NAME>_*` variables when the file has no entry.
    pub fn provider(&self, name: &str) -> Result<ClientConfig> {
        if let Some(config) = self.providers.get(name) {
            return Ok(config.clone());
        }

        let prefix = env_prefix(name);
        let config = ClientConfig::from_env(&prefix)?;
        if config.endpoint.is_empty() {
            return Err(Error::ProviderNotFound {
                name: name.to_string(),
            });
        }
        tracing::debug!(provider = name, prefix = %prefix, "Provider configured from environment");
        Ok(config)
    }

    /// Copy with every literal credential value masked
    ///
    /// `${ENV:NAME}` references are kept since they carry no secret.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for provider in copy.providers.values_mut() {
            for value in provider.credentials.values_mut() {
                if !value.starts_with("${ENV:") {
                    *value = "***".to_string();
                }
            }
        }
        copy
    }

    /// Configuration written by `config init`
    pub fn sample() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "qpay".to_string(),
            ClientConfig::new("https://merchant.qpay.mn/v2")
                .with_credential("username", "${ENV:QPAY_USERNAME}")
                .with_credential("password", "${ENV:QPAY_PASSWORD}")
                .with_credential("invoice_code", "${ENV:QPAY_INVOICE_CODE}")
                .with_callback_url("https://example.mn/payments/qpay"),
        );
        providers.insert(
            "golomt".to_string(),
            ClientConfig::new("https://ecommerce.golomtbank.com")
                .with_credential("secret", "${ENV:GOLOMT_SECRET}")
                .with_credential("token", "${ENV:GOLOMT_TOKEN}"),
        );
        Self {
            providers,
            ..Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// `monpay-deeplink` becomes `MNPAY_MONPAY_DEEPLINK`
fn env_prefix(name: &str) -> String {
    format!("MNPAY_{}", name.to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_round_trip_through_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("mnpay.yaml");

        Config::sample().save(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();

        let qpay = &loaded.providers["qpay"];
        assert_eq!(qpay.endpoint, "https://merchant.qpay.mn/v2");
        assert_eq!(qpay.credentials["username"], "${ENV:QPAY_USERNAME}");
        assert_eq!(qpay.max_retries, 3);
    }

    #[test]
    fn test_json_file_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mnpay.json");
        std::fs::write(
            &path,
            r#"{"providers": {"khanbank": {"endpoint": "https://epp.khanbank.com", "timeout_ms": 5000}}}"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        let khan = config.provider("khanbank").unwrap();
        assert_eq!(khan.timeout_ms, 5000);
        assert_eq!(khan.retry_delay_ms, 1000);
        assert!(config.output.color);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = Config::from_file(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mnpay.toml");
        std::fs::write(&path, "providers = {}").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }

    #[test]
    fn test_unknown_provider_without_env() {
        let err = Config::default()
            .provider("mnpay-test-unconfigured")
            .unwrap_err();
        assert!(matches!(err, Error::ProviderNotFound { .. }));
    }

    #[test]
    fn test_redaction_keeps_env_references() {
        let mut config = Config::sample();
        config
            .providers
            .get_mut("golomt")
            .unwrap()
            .credentials
            .insert("token".to_string(), "live-token".to_string());

        let redacted = config.redacted();
        let golomt = &redacted.providers["golomt"];
        assert_eq!(golomt.credentials["token"], "***");
        assert_eq!(golomt.credentials["secret"], "${ENV:GOLOMT_SECRET}");
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix("monpay-deeplink"), "MNPAY_MONPAY_DEEPLINK");
    }
}
