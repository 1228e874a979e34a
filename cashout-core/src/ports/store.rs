//! Record store port - persistence for cash-out records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{CashOutRecord, CashOutStatus, Provider};

/// Selection criteria for a batch of records.
///
/// Every field narrows the selection; the default filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct CashOutFilter {
    pub statuses: Vec<CashOutStatus>,
    pub provider: Option<Provider>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_to: Option<DateTime<Utc>>,
    /// Only records whose `next_retry_at` is set and not later than this
    pub next_retry_due_by: Option<DateTime<Utc>>,
    pub min_retry_count: Option<u32>,
    pub max_retry_count: Option<u32>,
    /// `Some(true)` keeps records the provider has acknowledged, `Some(false)` the rest
    pub acknowledged: Option<bool>,
}

impl CashOutFilter {
    pub fn provider(mut self, provider: Option<Provider>) -> Self {
        self.provider = provider;
        self
    }
}

/// Cash-out record store.
///
/// `save` with an expected version is a conditional write: it succeeds only
/// if the stored row still carries that version, and fails with
/// `Error::VersionConflict` otherwise. Both engines write exclusively through
/// it, so a race on one record has one winner and one no-op.
#[async_trait]
pub trait CashOutStore: Send + Sync {
    /// Insert a new record. Fails if the id or reference already exists.
    async fn create(&self, record: &CashOutRecord) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CashOutRecord>>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<CashOutRecord>>;

    /// Records matching `filter`, oldest `created_at` first
    async fn find(&self, filter: &CashOutFilter, limit: Option<usize>) -> Result<Vec<CashOutRecord>>;

    /// Persist `record`, returning it with its new version and `updated_at`.
    ///
    /// With `expected_version = None` the write is unconditional.
    async fn save(&self, record: &CashOutRecord, expected_version: Option<u64>) -> Result<CashOutRecord>;

    /// Record counts per status (statuses with no records are omitted)
    async fn count_by_status(&self) -> Result<Vec<(CashOutStatus, u64)>>;
}
