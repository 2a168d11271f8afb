//! Destroy command - removes one session.

use anyhow::Result;
use clap::Args;
use console::Style;
use serde_json::json;

use super::Context;

/// Arguments for the destroy command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Session id (without the store prefix)
    pub id: String,
}

/// Run the destroy command.
pub async fn run(args: DestroyArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    store.destroy(&args.id).await?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({"destroyed": args.id}))?
        );
    } else {
        println!(
            "{} Session '{}' destroyed",
            Style::new().green().apply_to("✓"),
            args.id
        );
    }
    Ok(())
}
