//! Lalantsika CLI
//!
//! Manual trigger for the sync core of the road-report platform.
//!
//! # Commands
//!
//! - `sync` - Run the full synchronization sequence
//! - `pass` - Run a single pass (`push-users`, `pull-reports`, ...)
//! - `status` - Probe the mirror and count pending records
//! - `version` - Show version information

mod commands;
mod error;
mod http;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Road-report sync trigger.
#[derive(Parser)]
#[command(name = "lalantsika")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the record store tables
    #[arg(global = true, short, long)]
    data: Option<PathBuf>,

    /// Directory used as the remote mirror
    #[arg(global = true, short, long, conflicts_with = "mirror_url")]
    mirror: Option<PathBuf>,

    /// Realtime Database URL used as the remote mirror
    #[arg(global = true, long)]
    mirror_url: Option<String>,

    /// Auth token appended to Realtime Database requests
    #[arg(global = true, long, requires = "mirror_url")]
    auth_token: Option<String>,

    /// JSON sync configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full synchronization sequence
    Sync,

    /// Run a single pass
    Pass {
        /// Pass name, e.g. push-users, pull-reports, push-reports
        step: String,
    },

    /// Probe the mirror and count pending records
    Status,

    /// Show version information
    Version,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let target = commands::Target {
        data: cli.data,
        mirror_dir: cli.mirror,
        mirror_url: cli.mirror_url,
        auth_token: cli.auth_token,
        config: cli.config,
    };

    let healthy = match cli.command {
        Commands::Sync => commands::sync::run(&target, cli.format)?,
        Commands::Pass { step } => commands::pass::run(&target, &step, cli.format)?,
        Commands::Status => commands::status::run(&target, cli.format)?,
        Commands::Version => {
            println!("Lalantsika CLI v{}", env!("CARGO_PKG_VERSION"));
            true
        }
    };

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
