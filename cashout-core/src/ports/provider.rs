//! Payment provider port
//!
//! Defines the RPC boundary to an external payment provider. Adapters never
//! mutate the record they are handed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::result::{Error, Result};
use crate::domain::{CashOutRecord, Provider, ProviderError, ProviderResult, ProviderStatusReport};

/// Payment provider adapter trait
///
/// Implementations talk to one provider over whatever transport it needs.
/// Timeouts are the adapter's responsibility and surface as
/// `ProviderErrorCode::Timeout`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter talks to
    fn provider(&self) -> Provider;

    /// Ask the provider to pay out `record`.
    ///
    /// The record's `reference` is the idempotency key: initiating the same
    /// reference twice must not move funds twice.
    async fn initiate(&self, record: &CashOutRecord) -> std::result::Result<ProviderResult, ProviderError>;

    /// Query the provider for the current state of an acknowledged payment
    async fn check_status(
        &self,
        provider_transaction_id: &str,
    ) -> std::result::Result<ProviderStatusReport, ProviderError>;
}

/// Registered provider adapters keyed by provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under the provider it reports
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or_else(|| Error::config(format!("No adapter registered for provider {}", provider)))
    }

    /// Registered providers in a stable order
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }
}
