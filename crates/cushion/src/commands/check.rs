//! Check command - verifies the session database is reachable.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use cushion_session::ConnectionState;
use serde::Serialize;

use super::Context;

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Also create the expired-session index if it is missing
    #[arg(long)]
    pub ensure_index: bool,
}

/// Check result for JSON output.
#[derive(Debug, Serialize)]
struct CheckOutput {
    connected: bool,
    database: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    index_ready: Option<bool>,
}

/// Run the check command.
pub async fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    let db = ctx.config.database()?;

    let connected = store.check_connection().await == ConnectionState::Connected;

    let mut index_error = None;
    let index_ready = if connected && args.ensure_index {
        match store.ensure_index().await {
            Ok(()) => Some(true),
            Err(e) => {
                index_error = Some(e);
                Some(false)
            }
        }
    } else {
        None
    };

    if ctx.json_output {
        let output = CheckOutput {
            connected,
            database: db.database().to_string(),
            url: db.base_url().to_string(),
            index_ready,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let dim = Style::new().dim();
        let status = if connected {
            Style::new().green().apply_to("● connected")
        } else {
            Style::new().red().apply_to("● unreachable")
        };

        println!();
        println!("{}", style("Session Database").bold());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!();
        println!("  {} {}", dim.apply_to("Status:"), status);
        println!("  {} {}", dim.apply_to("Server:"), db.base_url());
        println!("  {} {}", dim.apply_to("Database:"), db.database());
        match index_ready {
            Some(true) => println!("  {} ready", dim.apply_to("Index:")),
            Some(false) => println!("  {} {}", dim.apply_to("Index:"), style("failed").red()),
            None => {}
        }
        if ctx.verbose
            && let Some(e) = &index_error
        {
            println!();
            println!("  {} {}", dim.apply_to("Error:"), e);
        }
        println!();
    }

    if !connected {
        bail!("Session database is not reachable");
    }
    if let Some(e) = index_error {
        bail!("Failed to create expired-session index: {e}");
    }
    Ok(())
}
