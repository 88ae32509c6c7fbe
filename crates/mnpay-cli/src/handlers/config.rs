//! `config show|validate|init`

use crate::cli::{ConfigAction, ConfigArgs, ConfigInitArgs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputWriter;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
struct ValidationReport {
    valid: bool,
    providers: BTreeMap<String, String>,
}

pub fn handle_config(args: ConfigArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            output.section("Configuration")?;
            output.data(&config.redacted())
        }
        ConfigAction::Validate => validate(config, output),
        ConfigAction::Init(init) => init_file(init, output),
    }
}

fn validate(config: &Config, output: &mut OutputWriter) -> Result<()> {
    if config.providers.is_empty() {
        output.warning("No providers configured")?;
    }

    let mut report = ValidationReport {
        valid: true,
        providers: BTreeMap::new(),
    };
    for (name, provider) in &config.providers {
        let status = match provider.validate() {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                report.valid = false;
                e.to_string()
            }
        };
        tracing::debug!(provider = %name, status = %status, "Validated provider");
        report.providers.insert(name.clone(), status);
    }

    output.data(&report)?;
    if report.valid {
        Ok(())
    } else {
        Err(Error::config("one or more providers are invalid"))
    }
}

fn init_file(args: ConfigInitArgs, output: &mut OutputWriter) -> Result<()> {
    if args.path.exists() && !args.force {
        return Err(Error::invalid_args(format!(
            "{} already exists (use --force to overwrite)",
            args.path.display()
        )));
    }
    Config::sample().save(&args.path)?;
    output.success(&format!("Wrote {}", args.path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use mnpay_core::ClientConfig;
    use tempfile::TempDir;

    fn writer() -> OutputWriter {
        OutputWriter::with_writer(OutputFormat::Json, false, true, Box::new(std::io::sink()))
    }

    #[test]
    fn test_validate_reports_bad_endpoint() {
        let mut config = Config::sample();
        config
            .providers
            .insert("broken".to_string(), ClientConfig::new("ftp://nowhere"));

        let err = validate(&config, &mut writer()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_sample_config_is_valid() {
        assert!(validate(&Config::sample(), &mut writer()).is_ok());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mnpay.json");
        std::fs::write(&path, "{}").unwrap();

        let args = ConfigInitArgs {
            path: path.clone(),
            force: false,
        };
        assert!(init_file(args, &mut writer()).is_err());

        let args = ConfigInitArgs { path: path.clone(), force: true };
        init_file(args, &mut writer()).unwrap();
        assert!(Config::from_file(&path).unwrap().providers.contains_key("qpay"));
    }
}
