//! Shared fixtures for the integration tests
//!
//! Providers are sandboxed; the record store and audit log are real
//! in-memory DuckDB databases.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use cashout_core::adapters::{ChannelEventPublisher, DuckDbAuditLog, DuckDbCashOutStore, SandboxProvider};
use cashout_core::domain::{CashOutEvent, CashOutRecord, NewCashOut, Provider};
use cashout_core::ports::{CashOutStore, ProviderRegistry};
use cashout_core::services::{
    CashOutService, Notifier, ReconciliationEngine, RetryEngine, RetryPolicy, SchedulerConfig, Supervisor,
};

pub struct Harness {
    pub store: Arc<DuckDbCashOutStore>,
    pub audit: Arc<DuckDbAuditLog>,
    pub events: Arc<ChannelEventPublisher>,
    pub mtn: Arc<SandboxProvider>,
    pub airtel: Arc<SandboxProvider>,
    pub retry: Arc<RetryEngine>,
    pub reconciliation: Arc<ReconciliationEngine>,
    pub cash_outs: Arc<CashOutService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(SandboxProvider::new(Provider::MtnMomo), RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self::build(SandboxProvider::new(Provider::MtnMomo), policy)
    }

    pub fn with_mtn(mtn: SandboxProvider) -> Self {
        Self::build(mtn, RetryPolicy::default())
    }

    pub fn build(mtn: SandboxProvider, policy: RetryPolicy) -> Self {
        let store = Arc::new(DuckDbCashOutStore::open_in_memory().expect("Failed to open store"));
        let audit = Arc::new(DuckDbAuditLog::open_in_memory().expect("Failed to open audit log"));
        let events = Arc::new(ChannelEventPublisher::new());
        let mtn = Arc::new(mtn);
        let airtel = Arc::new(SandboxProvider::new(Provider::AirtelMoney));

        let registry = ProviderRegistry::new().with(mtn.clone()).with(airtel.clone());
        let store_port: Arc<dyn CashOutStore> = store.clone();
        let notifier = Notifier::new(audit.clone(), events.clone());
        let retry = Arc::new(RetryEngine::new(
            store_port.clone(),
            registry.clone(),
            notifier.clone(),
            policy,
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            store_port.clone(),
            registry.clone(),
            notifier.clone(),
        ));
        let cash_outs = Arc::new(CashOutService::new(store_port, registry, retry.clone(), notifier));

        Self {
            store,
            audit,
            events,
            mtn,
            airtel,
            retry,
            reconciliation,
            cash_outs,
        }
    }

    pub fn supervisor(&self, config: SchedulerConfig) -> Supervisor {
        Supervisor::new(self.retry.clone(), self.reconciliation.clone(), config)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CashOutEvent> {
        self.events.subscribe()
    }

    /// Insert `record` as is, bypassing the service layer
    pub async fn insert(&self, record: &CashOutRecord) {
        self.store.create(record).await.expect("Failed to insert record");
    }

    pub async fn reload(&self, record: &CashOutRecord) -> CashOutRecord {
        self.store
            .find_by_id(record.id)
            .await
            .expect("Failed to read record")
            .expect("Record missing")
    }

    pub fn audit_actions(&self, record: &CashOutRecord) -> Vec<String> {
        let mut actions: Vec<String> = self
            .audit
            .get_for_resource(&record.id.to_string(), 100)
            .expect("Failed to read audit log")
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        // Stored newest first
        actions.reverse();
        actions
    }
}

pub fn request(provider: Provider) -> NewCashOut {
    NewCashOut {
        user_id: "user-1".to_string(),
        wallet_id: "wallet-1".to_string(),
        amount: Decimal::new(50_000, 0),
        currency: "UGX".to_string(),
        fee: Decimal::new(500, 0),
        provider,
        provider_account_id: "256772123456".to_string(),
        provider_account_name: Some("Jane Doe".to_string()),
    }
}

pub fn pending(provider: Provider) -> CashOutRecord {
    CashOutRecord::new(request(provider))
}

/// A processing record the provider has acknowledged under `transaction_id`
pub fn acknowledged(provider: Provider, transaction_id: &str) -> CashOutRecord {
    let now = Utc::now();
    let mut record = pending(provider);
    record.begin_processing(now).unwrap();
    record
        .record_acknowledgement(transaction_id, serde_json::json!({"status": "PENDING"}), now)
        .unwrap();
    record
}

/// A processing record whose `retry_count`-th retry fell due a second ago
pub fn due_for_retry(provider: Provider, retry_count: u32) -> CashOutRecord {
    let now = Utc::now();
    let mut record = pending(provider);
    record.begin_processing(now).unwrap();
    for _ in 0..retry_count {
        record.schedule_retry(now - Duration::seconds(1), now).unwrap();
    }
    record
}

pub fn drain(receiver: &mut broadcast::Receiver<CashOutEvent>) -> Vec<CashOutEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
