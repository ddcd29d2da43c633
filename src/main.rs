// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use cairn::CancellationToken;
use clap::Parser;
use cli::{Cli, Commands};
use tracing::warn;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Some(Commands::Check { id, json, quiet }) => {
            let cancel = CancellationToken::new();
            let handler_token = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                warn!("Stop requested; finishing the current step");
                handler_token.cancel();
            }) {
                warn!("Could not install interrupt handler: {}", e);
            }

            let code = commands::cmd_check(config, id.as_deref(), json, quiet, cancel)?;
            std::process::exit(code);
        }
        Some(Commands::ForceStatus { format }) => commands::cmd_force_status(config, &format),
        Some(Commands::Completions { shell }) => commands::cmd_completions(shell),
        None => {
            println!("cairn {}", env!("CARGO_PKG_VERSION"));
            println!("Run 'cairn --help' for usage information");
            Ok(())
        }
    }
}
