//! mnpay CLI - tools for Mongolian payment-provider integrations
//!
//! Entry point: loads `.env`, parses arguments, reads configuration, sets up
//! logging and dispatches to a command handler.

mod cli;
mod config;
mod error;
mod handlers;
mod logging;
mod output;

use cli::{Cli, Commands};
use colored::control;
use config::Config;
use error::Result;
use logging::{timing::Timer, LoggingConfig};
use output::OutputWriter;
use std::process;
use tracing::instrument;

#[tokio::main]
async fn main() {
    // A missing .env file is not an error
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    control::set_override(cli.use_color());

    let result = match Config::load_with_file(cli.config.as_deref()) {
        Ok(config) => {
            if !config.output.color {
                control::set_override(false);
            }
            if let Err(e) = init_logging(&cli, &config) {
                eprintln!("Failed to initialize logging: {}", e);
            }
            run(cli, config).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{}", error::format_error(&e, control::SHOULD_COLORIZE.should_colorize()));
        if e.should_show_help() {
            eprintln!("\nFor more information, try '--help'");
        }
        process::exit(e.exit_code());
    }
}

#[instrument(skip_all, fields(command = cli.command.name()))]
async fn run(cli: Cli, config: Config) -> Result<()> {
    let _timer = Timer::new("cli_execution");

    let mut output = OutputWriter::new(
        cli.output,
        control::SHOULD_COLORIZE.should_colorize(),
        cli.quiet,
    );

    tracing::debug!(verbosity = cli.verbosity_level(), "Executing command");

    match cli.command {
        Commands::Sign(args) => handlers::handle_sign(args, &mut output),
        Commands::Verify(args) => handlers::handle_verify(args, &mut output),
        Commands::Classify(args) => handlers::handle_classify(args, &mut output),
        Commands::Reference(args) => handlers::handle_reference(args, &mut output),
        Commands::Token(args) => handlers::handle_token(args, &config, &mut output).await,
        Commands::Config(args) => handlers::handle_config(args, &config, &mut output),
        Commands::Completions(args) => handlers::handle_completions(args),
    }
}

fn init_logging(cli: &Cli, config: &Config) -> Result<()> {
    let verbosity = cli.verbosity_level();
    let mut logging_config = LoggingConfig::from_verbosity(verbosity);
    logging_config.merge_with_file(&config.logging, verbosity);
    logging_config.merge_with_env();

    if cli.quiet {
        logging_config.level = "error".to_string();
        logging_config.console = false;
    }

    logging::init_logging(logging_config)
}
