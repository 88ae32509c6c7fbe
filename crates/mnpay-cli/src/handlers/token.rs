//! `token`: fetch a bearer token through a provider's credential cache

use crate::cli::{TokenArgs, TokenProvider};
use crate::config::Config;
use crate::error::Result;
use crate::logging::{redaction, timing::Timer};
use crate::output::OutputWriter;
use chrono::{DateTime, Utc};
use mnpay_core::Credential;
use mnpay_providers::{MonpayDeeplinkClient, QpayClient, QpayQuickClient, StorepayClient};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct TokenSummary {
    provider: &'static str,
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    expires_in_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

impl TokenSummary {
    fn new(provider: TokenProvider, credential: &Credential) -> Self {
        Self {
            provider: provider.config_key(),
            access_token: credential.access_token().to_string(),
            refresh_token: credential.refresh_token().map(str::to_string),
            expires_at: credential.expires_at(),
            expires_in_secs: (credential.expires_at() - Utc::now()).num_seconds(),
            scope: credential.scope().map(str::to_string),
        }
    }
}

pub async fn handle_token(args: TokenArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| args.provider.config_key().to_string());
    let client_config = config.provider(&name)?;
    client_config.validate()?;
    output.info(&format!("Requesting {} token from {}", args.provider.config_key(), client_config.endpoint))?;

    let credential = {
        let _timer = Timer::new("token_fetch");
        tracing::info!(provider = args.provider.config_key(), config = %name, "Fetching token");
        match args.provider {
            TokenProvider::Qpay => QpayClient::new(client_config)?.token().await?,
            TokenProvider::QpayQuick => QpayQuickClient::new(client_config)?.token().await?,
            TokenProvider::Storepay => StorepayClient::new(client_config)?.token().await?,
            TokenProvider::MonpayDeeplink => MonpayDeeplinkClient::new(client_config)?.token().await?,
        }
    };

    let mut summary = serde_json::to_value(TokenSummary::new(args.provider, &credential))?;
    if !args.show_token {
        redaction::redact_json_value(&mut summary);
    }
    output.data(&summary)
}
