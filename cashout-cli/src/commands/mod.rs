//! CLI command implementations

pub mod audit;
pub mod cancel;
pub mod create;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod run;
pub mod show;
pub mod status;
pub mod submit;

use std::path::PathBuf;

use anyhow::{Context, Result};
use cashout_core::CashOutContext;

/// Get the cash-out data directory from environment or default
pub fn get_cashout_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("CASHOUT_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".cashout"))
}

/// Get or create the cash-out context
pub fn get_context() -> Result<CashOutContext> {
    let dir = get_cashout_dir()?;

    // Create directory if it doesn't exist
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory: {:?}", dir))?;

    CashOutContext::new(&dir).context("Failed to initialize cash-out context")
}

/// Print `value` as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
