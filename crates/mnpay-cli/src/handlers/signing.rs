//! `sign`, `verify` and `reference`

use crate::cli::{ReferenceArgs, SignArgs, VerifyArgs};
use crate::error::{Error, Result};
use crate::output::OutputWriter;
use mnpay_core::http::expand_env_vars;
use mnpay_core::{random_reference, SignatureSigner};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Signature {
    checksum: String,
    fields: usize,
}

#[derive(Debug, Serialize)]
struct Verification {
    valid: bool,
}

#[derive(Debug, Serialize)]
struct Reference {
    reference: String,
}

pub fn handle_sign(args: SignArgs, output: &mut OutputWriter) -> Result<()> {
    let secret = expand_env_vars(&args.secret)?;
    if secret.is_empty() {
        return Err(Error::invalid_args("secret must not be empty"));
    }
    tracing::debug!(fields = args.fields.len(), "Signing fields");

    output.data(&Signature {
        checksum: SignatureSigner::sign(&secret, &args.fields),
        fields: args.fields.len(),
    })
}

/// A mismatch is an error so scripts can rely on the exit code
pub fn handle_verify(args: VerifyArgs, output: &mut OutputWriter) -> Result<()> {
    let secret = expand_env_vars(&args.secret)?;
    let valid = SignatureSigner::verify(&secret, &args.fields, &args.checksum);
    tracing::debug!(valid, "Checksum verified");

    if !valid {
        return Err(Error::ChecksumMismatch);
    }
    output.success("Checksum matches")?;
    output.data(&Verification { valid })
}

pub fn handle_reference(args: ReferenceArgs, output: &mut OutputWriter) -> Result<()> {
    output.data(&Reference {
        reference: random_reference(usize::from(args.length)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;

    fn writer() -> OutputWriter {
        OutputWriter::with_writer(OutputFormat::Json, false, true, Box::new(std::io::sink()))
    }

    #[test]
    fn test_verify_accepts_own_signature() {
        let fields = vec!["TX-1".to_string(), "1000.00".to_string()];
        let checksum = SignatureSigner::sign("s3cret", &fields);

        let args = VerifyArgs {
            secret: "s3cret".into(),
            checksum,
            fields,
        };
        assert!(handle_verify(args, &mut writer()).is_ok());
    }

    #[test]
    fn test_verify_rejects_reordered_fields() {
        let checksum = SignatureSigner::sign("s3cret", &["TX-1", "1000.00"]);

        let args = VerifyArgs {
            secret: "s3cret".into(),
            checksum,
            fields: vec!["1000.00".into(), "TX-1".into()],
        };
        let err = handle_verify(args, &mut writer()).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch));
    }

    #[test]
    fn test_sign_rejects_missing_env_secret() {
        let args = SignArgs {
            secret: "${ENV:MNPAY_TEST_SURELY_UNSET_SECRET}".into(),
            fields: vec!["a".into()],
        };
        let err = handle_sign(args, &mut writer()).unwrap_err();
        assert!(matches!(err, Error::Core(_)));
    }
}
