//! Audit command - view the audit trail

use anyhow::Result;
use chrono::{TimeZone, Utc};
use colored::Colorize;

use super::{get_context, print_json};
use crate::output::create_table;

pub fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub fn run(limit: usize, resource: Option<&str>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let entries = match resource {
        Some(id) => ctx.audit_log.get_for_resource(id, limit)?,
        None => ctx.audit_log.get_recent(limit)?,
    };

    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No audit entries found.");
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Time", "Action", "Cash-out", "Severity", "Description"]);
    for entry in entries {
        let severity = match entry.severity.as_str() {
            "error" | "critical" => entry.severity.red().to_string(),
            "warning" => entry.severity.yellow().to_string(),
            _ => entry.severity.clone(),
        };
        table.add_row(vec![
            format_timestamp(entry.timestamp),
            entry.action,
            entry.resource_id,
            severity,
            entry.description,
        ]);
    }
    println!("{}", table);
    Ok(())
}
