// src/cli/mod.rs
//! CLI definitions for cairn
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `check` - Resolve manifests into a plan and download what it needs
//! - `force-status` - Evaluate force-install deadlines on the current plan
//! - `completions` - Generate shell completions

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cairn")]
#[command(author = "Cairn Contributors")]
#[command(version)]
#[command(about = "Managed software client: converges this machine to its manifests", long_about = None)]
pub struct Cli {
    /// Configuration file (default: /etc/cairn/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check for managed installs, removals and updates
    ///
    /// Exits with status 1 when there is something to install or remove.
    Check {
        /// Primary manifest to use instead of the configured client identifier
        #[arg(long)]
        id: Option<String>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Don't show download progress bars
        #[arg(long)]
        quiet: bool,
    },

    /// Show force-install deadlines for the pending plan
    ForceStatus {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
