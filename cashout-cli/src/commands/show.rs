//! Show command - one cash-out with its recent audit trail

use anyhow::Result;
use colored::Colorize;

use super::{get_context, print_json};
use crate::output::{create_table, print_record};

const TRAIL_LIMIT: usize = 10;

pub async fn run(key: &str, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let record = ctx.cash_outs.find(key).await?;

    if json {
        return print_json(&record);
    }

    print_record(&record);

    let trail = ctx.audit_log.get_for_resource(&record.id.to_string(), TRAIL_LIMIT)?;
    if !trail.is_empty() {
        println!();
        println!("{}", "Audit trail".bold());
        let mut table = create_table();
        table.set_header(vec!["Time", "Action", "Status", "Description"]);
        for entry in trail {
            table.add_row(vec![
                super::audit::format_timestamp(entry.timestamp),
                entry.action,
                entry.status,
                entry.description,
            ]);
        }
        println!("{}", table);
    }

    Ok(())
}
