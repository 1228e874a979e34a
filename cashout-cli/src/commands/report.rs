//! Report command - totals per status over a date range

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use colored::Colorize;

use super::{get_context, print_json};
use crate::output::{create_table, status_label, success};
use cashout_core::services::{ReconciliationReport, ReportOptions};
use cashout_core::Provider;

pub async fn run(
    start: NaiveDate,
    end: NaiveDate,
    provider: Option<Provider>,
    csv: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let report = ctx
        .reconciliation
        .generate_report(&ReportOptions {
            provider,
            start_date: start,
            end_date: end,
        })
        .await?;

    if let Some(path) = &csv {
        write_csv(&report, path).with_context(|| format!("Failed to write {:?}", path))?;
    }

    if json {
        return print_json(&report);
    }

    let scope = report.provider.map(|p| p.to_string()).unwrap_or_else(|| "all providers".to_string());
    println!(
        "{}",
        format!("Cash-outs {} to {} ({})", report.start_date, report.end_date, scope).bold()
    );

    let mut table = create_table();
    table.set_header(vec!["Status", "Count", "Amount", "Fees"]);
    for row in &report.by_status {
        table.add_row(vec![
            status_label(row.status).to_string(),
            row.totals.count.to_string(),
            row.totals.total_amount.to_string(),
            row.totals.total_fees.to_string(),
        ]);
    }
    table.add_row(vec![
        "total".bold().to_string(),
        report.total.count.to_string(),
        report.total.total_amount.to_string(),
        report.total.total_fees.to_string(),
    ]);
    println!("{}", table);

    if let Some(path) = csv {
        success(&format!("Wrote {}", path.display()));
    }
    Ok(())
}

fn write_csv(report: &ReconciliationReport, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["status", "count", "total_amount", "total_fees"])?;
    for row in &report.by_status {
        writer.write_record([
            row.status.as_str().to_string(),
            row.totals.count.to_string(),
            row.totals.total_amount.to_string(),
            row.totals.total_fees.to_string(),
        ])?;
    }
    writer.write_record([
        "total".to_string(),
        report.total.count.to_string(),
        report.total.total_amount.to_string(),
        report.total.total_fees.to_string(),
    ])?;
    writer.flush()?;
    Ok(())
}
