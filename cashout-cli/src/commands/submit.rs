//! Submit command - send a pending cash-out to its provider

use anyhow::Result;

use super::{get_context, print_json};
use crate::output::{print_record, warning};
use cashout_core::CashOutStatus;

pub async fn run(key: &str, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let before = ctx.cash_outs.find(key).await?;
    let record = ctx.cash_outs.submit(before.id).await?;

    if json {
        return print_json(&record);
    }

    if before.status != CashOutStatus::Pending {
        warning(&format!("Cash-out is {}, nothing submitted", before.status));
    }
    print_record(&record);
    Ok(())
}
