//! Reconcile command - poll providers for cash-outs still in flight

use anyhow::Result;
use colored::Colorize;

use super::{get_context, print_json};
use crate::output::create_table;
use cashout_core::services::{ProviderReconciliation, ReconcileAction};
use cashout_core::Provider;

pub async fn run(
    provider: Option<Provider>,
    batch_size: Option<usize>,
    max_age_days: Option<i64>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let mut options = ctx.config.reconcile_options();
    if let Some(size) = batch_size {
        options.batch_size = size;
    }
    if let Some(days) = max_age_days {
        options.max_age_days = days;
    }

    let runs = match provider {
        Some(provider) => {
            options.provider = Some(provider);
            let result = ctx.reconciliation.reconcile_pending(&options).await?;
            vec![ProviderReconciliation {
                provider,
                result: Some(result),
                error: None,
            }]
        }
        None => ctx.reconciliation.reconcile_all_providers(&options).await,
    };

    if json {
        return print_json(&runs);
    }

    for run in &runs {
        println!("{}", run.provider.to_string().bold());
        let Some(result) = &run.result else {
            println!("  {}", run.error.as_deref().unwrap_or("unknown error").red());
            continue;
        };
        println!(
            "  {} checked, {} updated, {} unchanged, {} errors",
            result.processed, result.updated, result.unchanged, result.failed
        );

        let changed: Vec<_> = result
            .details
            .iter()
            .filter(|d| d.action != ReconcileAction::Unchanged)
            .collect();
        if changed.is_empty() {
            continue;
        }
        let mut table = create_table();
        table.set_header(vec!["Reference", "Action", "From", "To", "Message"]);
        for detail in changed {
            table.add_row(vec![
                detail.reference.clone(),
                format!("{:?}", detail.action).to_lowercase(),
                detail.previous_status.to_string(),
                detail.new_status.map(|s| s.to_string()).unwrap_or_default(),
                detail.message.clone().unwrap_or_default(),
            ]);
        }
        println!("{}", table);
    }
    Ok(())
}
