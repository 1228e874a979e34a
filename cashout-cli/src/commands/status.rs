//! Status command - cash-out counts per status

use anyhow::Result;
use colored::Colorize;

use super::{get_context, print_json};
use crate::output::{create_table, status_label};
use cashout_core::CashOutStatus;

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let summary = ctx.cash_outs.status_summary().await?;

    if json {
        return print_json(&summary);
    }

    println!("{}", "Cash-out Status".bold());
    println!();

    let mut table = create_table();
    for status in CashOutStatus::ALL {
        table.add_row(vec![
            status_label(status).to_string(),
            summary.count(status).to_string(),
        ]);
    }
    table.add_row(vec!["total".bold().to_string(), summary.total.to_string()]);
    println!("{}", table);

    let providers: Vec<String> = ctx.providers.providers().iter().map(|p| p.to_string()).collect();
    println!();
    println!("{}", format!("Providers: {}", providers.join(", ")).dimmed());
    if ctx.config.sandbox {
        println!("{}", "Sandbox mode is on".yellow());
    }

    Ok(())
}
