//! Sandbox payment provider
//!
//! Deterministic in-process provider for local runs and tests. No money
//! moves: initiations are answered from a scripted queue (accepting by
//! default) and status checks from a per-transaction map (still processing by
//! default). Every call is recorded so callers can assert on it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    CashOutRecord, Provider, ProviderError, ProviderResult, ProviderStatus, ProviderStatusReport,
};
use crate::ports::ProviderAdapter;

type InitiateOutcome = Result<ProviderStatus, ProviderError>;
type StatusOutcome = Result<ProviderStatusReport, ProviderError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted provider standing in for a live API
pub struct SandboxProvider {
    provider: Provider,
    latency: Option<Duration>,
    script: Mutex<VecDeque<InitiateOutcome>>,
    statuses: Mutex<HashMap<String, StatusOutcome>>,
    initiate_calls: Mutex<Vec<String>>,
    status_calls: Mutex<Vec<String>>,
}

impl SandboxProvider {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            latency: None,
            script: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            initiate_calls: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
        }
    }

    /// Delay every call, to simulate a slow network round trip
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Transaction id the sandbox assigns to a reference
    pub fn transaction_id_for(reference: &str) -> String {
        format!("SBX-{}", reference)
    }

    /// Queue an accepted initiation reporting `status`
    pub fn accept_next(&self, status: ProviderStatus) -> &Self {
        lock(&self.script).push_back(Ok(status));
        self
    }

    /// Queue a failed initiation
    pub fn fail_next(&self, error: ProviderError) -> &Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Answer status checks for `transaction_id` with `status`
    pub fn set_status(&self, transaction_id: &str, status: ProviderStatus, failure_reason: Option<&str>) {
        let report = ProviderStatusReport {
            status,
            provider_response: serde_json::json!({
                "sandbox": true,
                "transactionId": transaction_id,
                "status": status,
            }),
            failure_reason: failure_reason.map(|s| s.to_string()),
        };
        lock(&self.statuses).insert(transaction_id.to_string(), Ok(report));
    }

    /// Make status checks for `transaction_id` fail with `error`
    pub fn set_status_error(&self, transaction_id: &str, error: ProviderError) {
        lock(&self.statuses).insert(transaction_id.to_string(), Err(error));
    }

    /// References passed to `initiate`, in call order
    pub fn initiate_calls(&self) -> Vec<String> {
        lock(&self.initiate_calls).clone()
    }

    /// Transaction ids passed to `check_status`, in call order
    pub fn status_calls(&self) -> Vec<String> {
        lock(&self.status_calls).clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ProviderAdapter for SandboxProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn initiate(&self, record: &CashOutRecord) -> Result<ProviderResult, ProviderError> {
        lock(&self.initiate_calls).push(record.reference.clone());
        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or(Ok(ProviderStatus::Processing));
        self.simulate_latency().await;

        let status = outcome?;
        let transaction_id = Self::transaction_id_for(&record.reference);
        Ok(ProviderResult {
            provider_response: serde_json::json!({
                "sandbox": true,
                "transactionId": transaction_id,
                "reference": record.reference,
                "status": status,
            }),
            provider_transaction_id: transaction_id,
            status,
        })
    }

    async fn check_status(&self, provider_transaction_id: &str) -> Result<ProviderStatusReport, ProviderError> {
        lock(&self.status_calls).push(provider_transaction_id.to_string());
        let outcome = lock(&self.statuses).get(provider_transaction_id).cloned();
        self.simulate_latency().await;

        outcome.unwrap_or_else(|| {
            Ok(ProviderStatusReport {
                status: ProviderStatus::Processing,
                provider_response: serde_json::json!({
                    "sandbox": true,
                    "transactionId": provider_transaction_id,
                    "status": ProviderStatus::Processing,
                }),
                failure_reason: None,
            })
        })
    }
}
