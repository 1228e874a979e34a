//! Output formatting utilities

use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};

use cashout_core::{CashOutRecord, CashOutStatus};

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Status name colored by outcome
pub fn status_label(status: CashOutStatus) -> ColoredString {
    match status {
        CashOutStatus::Completed => status.as_str().green(),
        CashOutStatus::Failed => status.as_str().red(),
        CashOutStatus::Cancelled => status.as_str().dimmed(),
        CashOutStatus::Processing => status.as_str().yellow(),
        CashOutStatus::Pending => status.as_str().cyan(),
    }
}

/// Local time, second precision
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_optional_time(time: Option<&DateTime<Utc>>) -> String {
    time.map(format_time).unwrap_or_else(|| "-".to_string())
}

/// Print a cash-out as key/value rows
pub fn print_record(record: &CashOutRecord) {
    let mut table = create_table();
    table.add_row(vec!["Id".to_string(), record.id.to_string()]);
    table.add_row(vec!["Reference".to_string(), record.reference.clone()]);
    table.add_row(vec!["Status".to_string(), status_label(record.status).to_string()]);
    table.add_row(vec!["Provider".to_string(), record.provider.to_string()]);
    table.add_row(vec![
        "Amount".to_string(),
        format!("{} {} (fee {})", record.amount, record.currency, record.fee),
    ]);
    let recipient = match &record.provider_account_name {
        Some(name) => format!("{} ({})", record.provider_account_id, name),
        None => record.provider_account_id.clone(),
    };
    table.add_row(vec!["Recipient".to_string(), recipient]);
    table.add_row(vec!["User / wallet".to_string(), format!("{} / {}", record.user_id, record.wallet_id)]);
    if let Some(txid) = &record.provider_transaction_id {
        table.add_row(vec!["Provider transaction".to_string(), txid.clone()]);
    }
    if let Some(reason) = &record.failure_reason {
        table.add_row(vec!["Failure".to_string(), reason.red().to_string()]);
    }
    table.add_row(vec!["Retries".to_string(), record.retry_count.to_string()]);
    if record.next_retry_at.is_some() {
        table.add_row(vec!["Next retry".to_string(), format_optional_time(record.next_retry_at.as_ref())]);
    }
    table.add_row(vec!["Created".to_string(), format_time(&record.created_at)]);
    table.add_row(vec!["Updated".to_string(), format_time(&record.updated_at)]);
    if record.completed_at.is_some() {
        table.add_row(vec!["Completed".to_string(), format_optional_time(record.completed_at.as_ref())]);
    }
    println!("{}", table);
}
