//! Cancel command - cancel a pending cash-out

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;

use super::get_context;

pub async fn run(key: &str, force: bool) -> Result<()> {
    let ctx = get_context()?;
    let record = ctx.cash_outs.find(key).await?;

    // Confirm unless --force
    if !force {
        println!(
            "\n{}",
            format!(
                "This will cancel {} ({} {} to {}).",
                record.reference, record.amount, record.currency, record.provider_account_id
            )
            .yellow()
        );

        if !Confirm::new()
            .with_prompt("Are you sure?")
            .default(false)
            .interact()?
        {
            println!("{}\n", "Aborted".dimmed());
            return Ok(());
        }
    }

    let cancelled = ctx.cash_outs.cancel(record.id).await?;
    println!("\n{} Cash-out {} cancelled\n", "✓".green(), cancelled.reference);
    Ok(())
}
