//! Cash-out core - mobile-money payout lifecycle
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core entities (CashOutRecord, provider results, events)
//! - **ports**: Trait definitions for external dependencies (CashOutStore, ProviderAdapter, sinks)
//! - **services**: Business logic orchestration (retry, reconciliation, supervisor)
//! - **adapters**: Concrete implementations (DuckDB, MTN MoMo, Airtel Money, sandbox)

pub mod domain;
pub mod ports;
pub mod services;
pub mod adapters;
pub mod config;
pub mod migrations;
pub mod audit_migrations;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use adapters::{
    AirtelMoneyProvider, ChannelEventPublisher, DuckDbAuditLog, DuckDbCashOutStore,
    MtnMomoProvider, SandboxProvider,
};
use config::Config;
use ports::{CashOutStore, ProviderAdapter, ProviderRegistry};
use services::*;

// Re-export commonly used types at crate root
pub use domain::{
    CashOutEvent, CashOutRecord, CashOutStatus, NewCashOut, Provider, ProviderError,
    ProviderErrorCode, ProviderStatus,
};
pub use domain::result::Error;

pub const CASH_OUT_DB_FILE: &str = "cashout.duckdb";

/// Main context for cash-out operations
///
/// This is the primary entry point for all business logic. It holds
/// the stores, configuration, and all services.
pub struct CashOutContext {
    pub config: Config,
    pub store: Arc<DuckDbCashOutStore>,
    pub audit_log: Arc<DuckDbAuditLog>,
    pub events: Arc<ChannelEventPublisher>,
    pub providers: ProviderRegistry,
    pub retry_engine: Arc<RetryEngine>,
    pub reconciliation: Arc<ReconciliationEngine>,
    pub cash_outs: CashOutService,
    pub supervisor: Supervisor,
}

impl CashOutContext {
    /// Create a new context over the data directory `data_dir`
    pub fn new(data_dir: &Path) -> Result<Self> {
        let config = Config::load(data_dir)?;

        let store = Arc::new(DuckDbCashOutStore::new(&data_dir.join(CASH_OUT_DB_FILE))?);
        store.ensure_schema()?;
        let audit_log = Arc::new(DuckDbAuditLog::new(data_dir)?);
        let events = Arc::new(ChannelEventPublisher::new());
        let providers = build_registry(&config)?;

        let store_port: Arc<dyn CashOutStore> = store.clone();
        let notifier = Notifier::new(audit_log.clone(), events.clone());
        let retry_engine = Arc::new(RetryEngine::new(
            Arc::clone(&store_port),
            providers.clone(),
            notifier.clone(),
            config.retry_policy(),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store_port),
            providers.clone(),
            notifier.clone(),
        ));
        let cash_outs = CashOutService::new(
            store_port,
            providers.clone(),
            Arc::clone(&retry_engine),
            notifier,
        );
        let supervisor = Supervisor::new(
            Arc::clone(&retry_engine),
            Arc::clone(&reconciliation),
            config.scheduler_config(),
        )
        .with_reconcile_options(config.reconcile_options());

        Ok(Self {
            config,
            store,
            audit_log,
            events,
            providers,
            retry_engine,
            reconciliation,
            cash_outs,
            supervisor,
        })
    }
}

/// Real adapters for configured providers, sandbox stand-ins for the rest
fn build_registry(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    let mtn: Arc<dyn ProviderAdapter> = if !config.sandbox && config.providers.mtn_momo.is_configured() {
        Arc::new(MtnMomoProvider::new(&config.providers.mtn_momo)?)
    } else {
        sandbox(config, Provider::MtnMomo)
    };
    registry.register(mtn);

    let airtel: Arc<dyn ProviderAdapter> =
        if !config.sandbox && config.providers.airtel_money.is_configured() {
            Arc::new(AirtelMoneyProvider::new(&config.providers.airtel_money)?)
        } else {
            sandbox(config, Provider::AirtelMoney)
        };
    registry.register(airtel);

    Ok(registry)
}

fn sandbox(config: &Config, provider: Provider) -> Arc<dyn ProviderAdapter> {
    if config.sandbox {
        info!(provider = %provider, "Sandbox mode, using simulated provider");
    } else {
        warn!(provider = %provider, "Provider credentials missing, using simulated provider");
    }
    Arc::new(SandboxProvider::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_falls_back_to_sandbox() {
        let dir = TempDir::new().unwrap();
        let ctx = CashOutContext::new(dir.path()).unwrap();

        assert_eq!(ctx.providers.providers(), vec![Provider::MtnMomo, Provider::AirtelMoney]);
        assert!(dir.path().join(CASH_OUT_DB_FILE).exists());
        assert!(dir.path().join(adapters::audit_log::AUDIT_DB_FILE).exists());
        assert!(!ctx.supervisor.is_running());
    }
}
