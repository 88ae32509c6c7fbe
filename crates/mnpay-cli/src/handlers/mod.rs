//! Command handlers
//!
//! Each handler takes its parsed arguments, the loaded configuration where it
//! needs one, and the output writer.

mod classify;
mod config;
mod signing;
mod token;

use crate::cli::{Cli, CompletionsArgs};
use crate::error::Result;
use clap::CommandFactory;

pub use classify::handle_classify;
pub use config::handle_config;
pub use signing::{handle_reference, handle_sign, handle_verify};
pub use token::handle_token;

/// Write completions for the requested shell to stdout
pub fn handle_completions(args: CompletionsArgs) -> Result<()> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(
        args.shell.to_clap_shell(),
        &mut command,
        name,
        &mut std::io::stdout(),
    );
    Ok(())
}
