//! Cash-out service - request intake, initial provider call, cancellation

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::notifier::Notifier;
use super::retry::{Attempt, RetryEngine, RetryOutcome, SkipReason};
use crate::domain::result::{Error, Result};
use crate::domain::{AuditEntry, CashOutRecord, CashOutStatus, NewCashOut};
use crate::ports::{CashOutStore, ProviderRegistry};

/// Attempts at finding a free reference before giving up
const REFERENCE_ATTEMPTS: usize = 3;

/// Record counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub total: u64,
    pub counts: Vec<(CashOutStatus, u64)>,
}

impl StatusSummary {
    pub fn count(&self, status: CashOutStatus) -> u64 {
        self.counts
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

pub struct CashOutService {
    store: Arc<dyn CashOutStore>,
    providers: ProviderRegistry,
    retry_engine: Arc<RetryEngine>,
    notifier: Notifier,
}

impl CashOutService {
    pub fn new(
        store: Arc<dyn CashOutStore>,
        providers: ProviderRegistry,
        retry_engine: Arc<RetryEngine>,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            providers,
            retry_engine,
            notifier,
        }
    }

    /// Validate and persist a new pending cash-out
    pub async fn create(&self, request: NewCashOut) -> Result<CashOutRecord> {
        request.validate()?;
        let mut record = CashOutRecord::new(request);

        let mut attempt = 1;
        loop {
            match self.store.create(&record).await {
                Ok(()) => break,
                Err(Error::DuplicateReference(reference)) if attempt < REFERENCE_ATTEMPTS => {
                    debug!(reference = %reference, attempt, "Reference collision, regenerating");
                    record.regenerate_reference();
                    attempt += 1;
                }
                Err(Error::DuplicateReference(reference)) => {
                    return Err(Error::database(format!(
                        "Could not allocate a unique reference after {} attempts (last: {})",
                        REFERENCE_ATTEMPTS, reference
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            cash_out_id = %record.id,
            reference = %record.reference,
            provider = %record.provider,
            amount = %record.amount,
            currency = %record.currency,
            "Cash-out created"
        );
        self.notifier
            .audit(AuditEntry::cash_out("cash_out.created", &record, "Cash-out requested"))
            .await;
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> Result<CashOutRecord> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Cash-out {} not found", id)))
    }

    pub async fn get_by_reference(&self, reference: &str) -> Result<CashOutRecord> {
        self.store
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| Error::not_found(format!("Cash-out {} not found", reference)))
    }

    /// Look up by id if `key` parses as one, by reference otherwise
    pub async fn find(&self, key: &str) -> Result<CashOutRecord> {
        match Uuid::parse_str(key) {
            Ok(id) => self.get(id).await,
            Err(_) => self.get_by_reference(key).await,
        }
    }

    /// Make the initial provider call for a pending cash-out.
    ///
    /// Anything not pending is returned unchanged without calling the
    /// provider. `processing` is persisted with a claim lease before the call
    /// goes out, so an interrupted submission is picked up by the retry sweep.
    pub async fn submit(&self, id: Uuid) -> Result<CashOutRecord> {
        let record = self.get(id).await?;
        if record.status != CashOutStatus::Pending {
            debug!(cash_out_id = %id, status = %record.status, "Submit ignored, not pending");
            return Ok(record);
        }

        let adapter = self.providers.get(record.provider)?;

        let now = Utc::now();
        let mut processing = record.clone();
        processing.begin_processing(now)?;
        processing.next_retry_at = Some(self.retry_engine.policy().lease_until(now));
        let processing = match self.store.save(&processing, Some(record.version)).await {
            Ok(saved) => saved,
            Err(e) if e.is_conflict() => {
                debug!(cash_out_id = %id, "Submit lost race, returning current record");
                return self.get(id).await;
            }
            Err(e) => return Err(e),
        };

        info!(
            cash_out_id = %id,
            reference = %processing.reference,
            provider = %processing.provider,
            "Submitting cash-out to provider"
        );

        let attempt: Attempt = match adapter.initiate(&processing).await {
            Ok(result) => self.retry_engine.apply_initiation(processing, result).await?,
            Err(error) => self.retry_engine.handle_provider_error(processing, error).await?,
        };
        if matches!(attempt.outcome, RetryOutcome::Skipped(SkipReason::Conflict)) {
            debug!(cash_out_id = %id, "Submit result superseded by a concurrent update");
        }
        Ok(attempt.record)
    }

    /// Cancel a pending cash-out. Any other status is an invalid transition.
    pub async fn cancel(&self, id: Uuid) -> Result<CashOutRecord> {
        let record = self.get(id).await?;
        let mut cancelled = record.clone();
        cancelled.cancel(Utc::now())?;
        let saved = self.store.save(&cancelled, Some(record.version)).await?;

        info!(cash_out_id = %id, reference = %saved.reference, "Cash-out cancelled");
        self.notifier
            .audit(AuditEntry::cash_out("cash_out.cancelled", &saved, "Cancelled before submission"))
            .await;
        Ok(saved)
    }

    pub async fn status_summary(&self) -> Result<StatusSummary> {
        let counts = self.store.count_by_status().await?;
        Ok(StatusSummary {
            total: counts.iter().map(|(_, n)| n).sum(),
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_count_defaults_to_zero() {
        let summary = StatusSummary {
            total: 3,
            counts: vec![(CashOutStatus::Pending, 2), (CashOutStatus::Failed, 1)],
        };
        assert_eq!(summary.count(CashOutStatus::Pending), 2);
        assert_eq!(summary.count(CashOutStatus::Completed), 0);
    }
}
