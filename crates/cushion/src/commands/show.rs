//! Show command - prints one stored session.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use console::{Style, style};
use cushion_session::{Liveness, SessionRecord};
use serde::Serialize;
use serde_json::{Map, Value};

use super::Context;

/// Arguments for the show command.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Session id (without the store prefix)
    pub id: String,
}

/// Session details for JSON output.
#[derive(Debug, Serialize)]
struct ShowOutput<'a> {
    id: &'a str,
    revision: Option<&'a str>,
    ttl_seconds: u64,
    modified_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    session: &'a Map<String, Value>,
}

impl<'a> From<&'a SessionRecord> for ShowOutput<'a> {
    fn from(record: &'a SessionRecord) -> Self {
        Self {
            id: &record.id,
            revision: record.revision().map(|r| r.as_str()),
            ttl_seconds: record.ttl_seconds,
            modified_at: DateTime::from_timestamp_millis(record.modified_at_millis),
            expires_at: DateTime::from_timestamp_millis(record.expires_at_millis()),
            session: &record.session.fields,
        }
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Run the show command.
///
/// An expired session is removed before returning, at the revision that was
/// found expired.
pub async fn run(args: ShowArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store()?;

    let record = match store.inspect(&args.id).await? {
        Liveness::Live(record) => Some(record),
        Liveness::Expired(record) => {
            if let Some(rev) = record.revision() {
                store.destroy_revision(&args.id, rev).await?;
            }
            if ctx.json_output {
                println!("null");
            } else {
                println!(
                    "{} Session '{}' had expired and was removed",
                    Style::new().yellow().apply_to("!"),
                    args.id
                );
            }
            return Ok(());
        }
        Liveness::Absent => None,
    };

    if ctx.json_output {
        let output = record.as_ref().map(ShowOutput::from);
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let Some(record) = record else {
        println!(
            "{} No live session '{}'",
            Style::new().yellow().apply_to("!"),
            args.id
        );
        return Ok(());
    };

    let output = ShowOutput::from(&record);
    println!();
    println!("{}", style(format!("Session {}", args.id)).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!("  {} {}", dim.apply_to("Document:"), output.id);
    println!(
        "  {} {}",
        dim.apply_to("Revision:"),
        output.revision.unwrap_or("-")
    );
    println!("  {} {}s", dim.apply_to("TTL:"), output.ttl_seconds);
    println!(
        "  {} {}",
        dim.apply_to("Modified:"),
        format_time(output.modified_at)
    );
    println!(
        "  {} {}",
        dim.apply_to("Expires:"),
        format_time(output.expires_at)
    );
    println!();
    println!("{}", serde_json::to_string_pretty(output.session)?);
    println!();

    Ok(())
}
