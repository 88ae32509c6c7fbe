//! Command-line interface argument parsing and definitions
//!
//! The CLI is defined with clap's derive API.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

/// mnpay - tools for Mongolian payment-provider integrations
///
/// Sign and verify checksums, inspect how provider responses are classified,
/// and fetch tokens through a configured provider client.
#[derive(Parser, Debug)]
#[command(
    name = "mnpay",
    version,
    author,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Enable verbose output (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "MNPAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for results
    #[arg(short, long, value_enum, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the HMAC-SHA256 checksum of ordered fields
    Sign(SignArgs),

    /// Check a checksum against ordered fields
    Verify(VerifyArgs),

    /// Show the error envelope a response would be classified as
    Classify(ClassifyArgs),

    /// Print a random reference string
    Reference(ReferenceArgs),

    /// Fetch a bearer token through a configured provider client
    Token(TokenArgs),

    /// Inspect, validate or create the configuration file
    Config(ConfigArgs),

    /// Generate shell completions for the specified shell
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
pub struct SignArgs {
    /// Shared secret; may be an `${ENV:NAME}` reference
    #[arg(long, env = "MNPAY_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Fields in protocol order
    #[arg(value_name = "FIELD", required = true)]
    pub fields: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Shared secret; may be an `${ENV:NAME}` reference
    #[arg(long, env = "MNPAY_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Hex checksum received from the provider
    #[arg(long)]
    pub checksum: String,

    /// Fields in protocol order
    #[arg(value_name = "FIELD", required = true)]
    pub fields: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ClassifyArgs {
    /// HTTP status of the response
    #[arg(long)]
    pub status: u16,

    /// Response body (JSON)
    #[arg(long)]
    pub body: Option<String>,

    /// Provider name recorded in the envelope
    #[arg(long, default_value = "unknown")]
    pub provider: String,
}

#[derive(Parser, Debug)]
pub struct ReferenceArgs {
    /// Number of characters
    #[arg(short, long, default_value_t = 16, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub length: u16,
}

#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// Provider whose token endpoint to call
    #[arg(value_enum)]
    pub provider: TokenProvider,

    /// Configuration entry to use (defaults to the provider name)
    #[arg(long)]
    pub name: Option<String>,

    /// Print the access token itself
    #[arg(long)]
    pub show_token: bool,
}

/// Providers that issue bearer tokens
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TokenProvider {
    Qpay,
    QpayQuick,
    Storepay,
    MonpayDeeplink,
}

impl TokenProvider {
    /// Default key in the `providers` section of the config file
    pub fn config_key(self) -> &'static str {
        match self {
            TokenProvider::Qpay => "qpay",
            TokenProvider::QpayQuick => "qpay-quick",
            TokenProvider::Storepay => "storepay",
            TokenProvider::MonpayDeeplink => "monpay-deeplink",
        }
    }
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the loaded configuration with secrets redacted
    Show,

    /// Validate every configured provider
    Validate,

    /// Write a sample configuration file
    Init(ConfigInitArgs),
}

#[derive(Parser, Debug)]
pub struct ConfigInitArgs {
    /// Where to write the file (`.yaml`/`.yml` for YAML, otherwise JSON)
    #[arg(default_value = "mnpay.yaml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    Json,
    /// Pretty-printed JSON output
    JsonPretty,
    Yaml,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl Commands {
    /// Subcommand name, safe to log (arguments may hold secrets)
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Sign(_) => "sign",
            Commands::Verify(_) => "verify",
            Commands::Classify(_) => "classify",
            Commands::Reference(_) => "reference",
            Commands::Token(_) => "token",
            Commands::Config(_) => "config",
            Commands::Completions(_) => "completions",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Effective verbosity; quiet wins
    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }

    pub fn use_color(&self) -> bool {
        !self.no_color && std::io::stdout().is_terminal()
    }
}

impl Shell {
    pub fn to_clap_shell(self) -> clap_complete::Shell {
        match self {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::PowerShell => clap_complete::Shell::PowerShell,
            Shell::Elvish => clap_complete::Shell::Elvish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sign_keeps_field_order() {
        let cli = Cli::parse_from(["mnpay", "sign", "--secret", "s", "TX-1", "100.00", "POST"]);
        match cli.command {
            Commands::Sign(args) => assert_eq!(args.fields, ["TX-1", "100.00", "POST"]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbosity_level() {
        let cli = Cli::parse_from(["mnpay", "-vv", "reference"]);
        assert_eq!(cli.verbosity_level(), 2);

        let cli = Cli::parse_from(["mnpay", "--quiet", "reference"]);
        assert_eq!(cli.verbosity_level(), 0);
    }

    #[test]
    fn test_token_provider_names() {
        let cli = Cli::parse_from(["mnpay", "token", "monpay-deeplink", "--show-token"]);
        match cli.command {
            Commands::Token(args) => {
                assert_eq!(args.provider, TokenProvider::MonpayDeeplink);
                assert_eq!(args.provider.config_key(), "monpay-deeplink");
                assert!(args.show_token);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::parse_from(["mnpay", "token", "qpay-quick"]);
        match cli.command {
            Commands::Token(args) => assert_eq!(args.provider.config_key(), "qpay-quick"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_reference_length_bounds() {
        assert!(Cli::try_parse_from(["mnpay", "reference", "--length", "0"]).is_err());
        assert!(Cli::try_parse_from(["mnpay", "reference", "--length", "32"]).is_ok());
    }
}
