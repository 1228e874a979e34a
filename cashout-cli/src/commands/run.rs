//! Run command - keep the supervisor running until interrupted

use anyhow::{Context, Result};
use tracing::info;

use super::get_context;
use crate::output::info as print_info;

pub async fn run() -> Result<()> {
    let ctx = get_context()?;
    let mut events = ctx.events.subscribe();

    ctx.supervisor.start();
    print_info("Supervisor running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => info!(
                    event = event.name(),
                    cash_out_id = %event.cash_out_id,
                    reference = %event.reference,
                    "Terminal event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    info!(missed, "Event listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    ctx.supervisor.stop().await;
    Ok(())
}
