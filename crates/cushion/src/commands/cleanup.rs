//! Cleanup command - deletes expired sessions once or on an interval.

use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use cushion_session::{CleanupReport, SessionStore};

use super::Context;

/// Arguments for the cleanup command.
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Maximum sessions deleted per run (default: store cleanup_batch_size)
    #[arg(short, long)]
    pub batch: Option<usize>,

    /// Keep running, one cleanup every SECS seconds, until interrupted
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,
}

/// Run the cleanup command.
pub async fn run(args: CleanupArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    let batch = args
        .batch
        .unwrap_or(store.config().cleanup_batch_size);
    if batch == 0 {
        bail!("--batch must be at least 1");
    }

    match args.interval {
        None => {
            let report = store.cleanup_expired(batch).await?;
            print_report(&report, ctx);
            Ok(())
        }
        Some(0) => bail!("--interval must be at least 1 second"),
        Some(secs) => run_periodic(&store, batch, Duration::from_secs(secs), ctx).await,
    }
}

async fn run_periodic(
    store: &SessionStore,
    batch: usize,
    period: Duration,
    ctx: &Context,
) -> Result<()> {
    tracing::info!(batch, period_secs = period.as_secs(), "Starting periodic cleanup");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Failures were already logged and emitted by the store.
                match store.cleanup_expired(batch).await {
                    Ok(report) => print_report(&report, ctx),
                    Err(e) => tracing::debug!(error = %e, "Cleanup run failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping cleanup");
                return Ok(());
            }
        }
    }
}

fn print_report(report: &CleanupReport, ctx: &Context) {
    if ctx.json_output {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode cleanup report"),
        }
        return;
    }

    let dim = Style::new().dim();
    let mark = if report.failed == 0 {
        Style::new().green().apply_to("✓")
    } else {
        Style::new().yellow().apply_to("!")
    };
    println!(
        "{} Deleted {} expired session(s) {}",
        mark,
        report.deleted,
        dim.apply_to(format!(
            "(matched {}, failed {})",
            report.matched, report.failed
        ))
    );
}
