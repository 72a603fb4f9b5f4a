//! SideKeep CLI - Command-line interface for SideKeep
//!
//! Provides commands for:
//! - Running a revalidation scan and reviewing orphans
//! - Explaining how a single path is treated
//! - Viewing and editing configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sidekeep_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    check::CheckCommand, completions::CompletionsCommand, config::ConfigCommand,
    scan::ScanCommand, CommandContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "sidekeep",
    version,
    about = "Keeps sidecars, redirects and previews beside the files they describe"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create missing sidecars and review orphaned derivatives
    Scan(ScanCommand),
    /// Explain how a path is treated
    Check(CheckCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    let ctx = CommandContext {
        config_path: cli.config.clone().unwrap_or_else(Config::default_path),
        format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Scan(cmd) => cmd.execute(&ctx).await,
        Commands::Check(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(cmd) => cmd.execute(&ctx).await,
    }
}
