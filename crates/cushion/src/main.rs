//! cushion - inspect and maintain session stores.
//!
//! Main entry point for the cushion CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;
mod config;

use commands::{check, cleanup, destroy, show};
use config::CliConfig;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// cushion - inspect and maintain session stores
#[derive(Parser)]
#[command(name = "cushion")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (default: ./cushion.toml)
    #[arg(short, long, global = true, env = "CUSHION_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the session database is reachable
    Check(check::CheckArgs),

    /// Show a stored session
    Show(show::ShowArgs),

    /// Destroy a session
    Destroy(destroy::DestroyArgs),

    /// Delete expired sessions
    Cleanup(cleanup::CleanupArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v.
    let default_filter = if cli.verbose {
        "cushion=debug,cushion_session=debug,cushion_couch=debug,warn"
    } else {
        "cushion=info,cushion_session=info,cushion_couch=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();

    let config = CliConfig::load(cli.config.as_deref())?;

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Check(args) => check::run(args, &ctx).await,
        Commands::Show(args) => show::run(args, &ctx).await,
        Commands::Destroy(args) => destroy::run(args, &ctx).await,
        Commands::Cleanup(args) => cleanup::run(args, &ctx).await,
    }
}
