//! Retry commands - run one retry, or sweep every due retry

use anyhow::Result;
use colored::Colorize;

use super::{get_context, print_json};
use crate::output::{format_time, info, success, warning};
use cashout_core::services::{RetryOutcome, SkipReason};

pub async fn run(key: &str, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let record = ctx.cash_outs.find(key).await?;
    let outcome = ctx.retry_engine.execute_retry(record.id).await?;

    if json {
        return print_json(&outcome);
    }

    match outcome {
        RetryOutcome::Completed => success(&format!("Cash-out {} completed", record.reference)),
        RetryOutcome::Failed { reason } => {
            println!("{} Cash-out {} failed: {}", "✗".red(), record.reference, reason)
        }
        RetryOutcome::InFlight => info(&format!(
            "Provider accepted {}; reconciliation will settle it",
            record.reference
        )),
        RetryOutcome::Rescheduled {
            retry_count,
            next_retry_at,
        } => warning(&format!(
            "Attempt failed; retry {} scheduled for {}",
            retry_count,
            format_time(&next_retry_at)
        )),
        RetryOutcome::Skipped(SkipReason::NotProcessing(status)) => {
            warning(&format!("Nothing to retry, cash-out is {}", status))
        }
        RetryOutcome::Skipped(SkipReason::NotDue) => warning("Nothing to retry, no retry is due yet"),
        RetryOutcome::Skipped(SkipReason::Conflict) => {
            warning("Another worker is already handling this cash-out")
        }
    }
    Ok(())
}

pub async fn run_sweep(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let result = ctx.supervisor.tick_retries().await?;

    if json {
        return print_json(&result);
    }

    if result.found == 0 {
        println!("{}", "No retries due".dimmed());
        return Ok(());
    }
    println!(
        "Found {}, executed {}, skipped {}, errors {}",
        result.found, result.executed, result.skipped, result.failed
    );
    Ok(())
}
