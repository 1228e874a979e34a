//! Create command - record a new cash-out, optionally submitting it

use anyhow::Result;

use super::{get_context, print_json};
use crate::output::{print_record, success};
use cashout_core::NewCashOut;

pub async fn run(request: NewCashOut, submit: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let mut record = ctx.cash_outs.create(request).await?;
    if submit {
        record = ctx.cash_outs.submit(record.id).await?;
    }

    if json {
        return print_json(&record);
    }

    success(&format!("Created cash-out {}", record.reference));
    print_record(&record);
    Ok(())
}
