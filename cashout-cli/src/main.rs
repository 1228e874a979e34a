//! Cash-out CLI - operate the payout lifecycle from a terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use cashout_core::Provider;

mod commands;
mod output;

use commands::{audit, cancel, create, reconcile, report, retry, run, show, status, submit};

const LOG_ENV: &str = "CASHOUT_LOG";

/// Cash-out - mobile-money payouts with retries and reconciliation
#[derive(Parser)]
#[command(name = "cashout", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cash-out counts per status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one cash-out by id or reference
    Show {
        /// Cash-out id or reference
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a new pending cash-out
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "UGX")]
        currency: String,
        #[arg(long, default_value = "0")]
        fee: Decimal,
        /// mtn_momo or airtel_money
        #[arg(long)]
        provider: Provider,
        /// Recipient MSISDN
        #[arg(long)]
        account: String,
        #[arg(long)]
        account_name: Option<String>,
        /// Send to the provider right away
        #[arg(long)]
        submit: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a pending cash-out to its provider
    Submit {
        /// Cash-out id or reference
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel a pending cash-out
    Cancel {
        /// Cash-out id or reference
        key: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Run a scheduled retry now, if it is due
    Retry {
        /// Cash-out id or reference
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute every retry that has fallen due
    SweepRetries {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Poll providers for cash-outs still in flight
    Reconcile {
        /// Only reconcile this provider
        #[arg(long)]
        provider: Option<Provider>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        max_age_days: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Totals per status for a date range
    Report {
        /// First day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        provider: Option<Provider>,
        /// Also write the totals to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent audit entries
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Only entries for this cash-out id
        #[arg(long)]
        resource: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the retry timers and periodic sweeps until Ctrl-C
    Run,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(dispatch(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Status { json } => status::run(json).await,
        Commands::Show { key, json } => show::run(&key, json).await,
        Commands::Create {
            user,
            wallet,
            amount,
            currency,
            fee,
            provider,
            account,
            account_name,
            submit,
            json,
        } => {
            let request = cashout_core::NewCashOut {
                user_id: user,
                wallet_id: wallet,
                amount,
                currency,
                fee,
                provider,
                provider_account_id: account,
                provider_account_name: account_name,
            };
            create::run(request, submit, json).await
        }
        Commands::Submit { key, json } => submit::run(&key, json).await,
        Commands::Cancel { key, force } => cancel::run(&key, force).await,
        Commands::Retry { key, json } => retry::run(&key, json).await,
        Commands::SweepRetries { json } => retry::run_sweep(json).await,
        Commands::Reconcile {
            provider,
            batch_size,
            max_age_days,
            json,
        } => reconcile::run(provider, batch_size, max_age_days, json).await,
        Commands::Report {
            start,
            end,
            provider,
            csv,
            json,
        } => report::run(start, end, provider, csv, json).await,
        Commands::Audit { limit, resource, json } => audit::run(limit, resource.as_deref(), json),
        Commands::Run => run::run().await,
    }
}
