//! Retry engine - bounded exponential backoff for failed provider calls
//!
//! A failed call is either rescheduled (transient error, attempts left) or
//! fails the cash-out for good. Deferred attempts are handed to the
//! supervisor's timer loop through a channel; without a running supervisor
//! the periodic sweep picks them up when they fall due.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notifier::Notifier;
use crate::domain::result::{Error, Result};
use crate::domain::{
    classify_failure, AuditEntry, AuditSeverity, AuditStatus, CashOutRecord, CashOutStatus,
    FailureKind, ProviderError, ProviderErrorCode, ProviderResult, ProviderStatus,
    ProviderStatusReport,
};
use crate::ports::{CashOutFilter, CashOutStore, ProviderRegistry};

/// Failure reason used when the provider reports failure without one
pub const PROVIDER_REPORTED_FAILURE: &str = "Provider reported failure";

/// Retry limits and backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Lease taken on a record before each provider call. If the attempt
    /// never reports back, the record falls due again once it runs out.
    pub claim_lease_ms: u64,
    pub retryable_codes: HashSet<ProviderErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 30_000,
            max_delay_ms: 3_600_000,
            claim_lease_ms: 120_000,
            retryable_codes: ProviderErrorCode::DEFAULT_RETRYABLE.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// `min(initial * 2^retry_count, max)`, saturating instead of overflowing
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry_count);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// End of a lease taken at `now`
    pub fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lease_ms = i64::try_from(self.claim_lease_ms).unwrap_or(i64::MAX);
        chrono::Duration::try_milliseconds(lease_ms)
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether `error` on `record` earns another attempt
    pub fn should_retry(&self, record: &CashOutRecord, error: &ProviderError) -> bool {
        if record.retry_count >= self.max_retries {
            return false;
        }
        if record.status.is_terminal() {
            return false;
        }
        if !self.retryable_codes.contains(&error.code) {
            return false;
        }
        classify_failure(error) != FailureKind::BusinessRejection
    }
}

/// A deferred attempt handed to the timer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub cash_out_id: Uuid,
    pub delay: Duration,
}

/// Why an attempt did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "status", rename_all = "snake_case")]
pub enum SkipReason {
    /// The record is not in `processing`
    NotProcessing(CashOutStatus),
    /// No retry is scheduled yet, or it is scheduled later
    NotDue,
    /// Another worker changed the record first
    Conflict,
}

/// Result of one provider attempt on one record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryOutcome {
    Completed,
    Failed { reason: String },
    /// The provider accepted the payment but has not settled it
    InFlight,
    Rescheduled {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    Skipped(SkipReason),
}

/// An attempt's outcome together with the record as last persisted
#[derive(Debug, Clone)]
pub struct Attempt {
    pub outcome: RetryOutcome,
    pub record: CashOutRecord,
}

/// Counters for one sweep over due retries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrySweepResult {
    pub found: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum ProviderCall {
    Initiated(ProviderResult),
    Polled(ProviderStatusReport),
}

pub struct RetryEngine {
    store: Arc<dyn CashOutStore>,
    providers: ProviderRegistry,
    notifier: Notifier,
    policy: RetryPolicy,
    timer: Mutex<Option<mpsc::UnboundedSender<ScheduledRetry>>>,
}

impl RetryEngine {
    pub fn new(
        store: Arc<dyn CashOutStore>,
        providers: ProviderRegistry,
        notifier: Notifier,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            providers,
            notifier,
            policy,
            timer: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Route deferred attempts to a timer loop
    pub fn attach_timer(&self, sender: mpsc::UnboundedSender<ScheduledRetry>) {
        *self.timer.lock().unwrap_or_else(|p| p.into_inner()) = Some(sender);
    }

    pub fn detach_timer(&self) {
        *self.timer.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn arm(&self, cash_out_id: Uuid, delay: Duration) {
        let mut timer = self.timer.lock().unwrap_or_else(|p| p.into_inner());
        match timer.as_ref() {
            Some(sender) => {
                if sender.send(ScheduledRetry { cash_out_id, delay }).is_err() {
                    debug!(cash_out_id = %cash_out_id, "Timer loop gone; leaving retry to the sweep");
                    *timer = None;
                }
            }
            None => debug!(cash_out_id = %cash_out_id, "No timer attached; leaving retry to the sweep"),
        }
    }

    /// Schedule another attempt for `record` after `error`.
    ///
    /// Returns `Ok(false)` when the policy declines. On success `record` is
    /// replaced by the persisted version. A lost conditional write surfaces
    /// as `Error::VersionConflict` and leaves `record` untouched.
    pub async fn schedule_retry(&self, record: &mut CashOutRecord, error: &ProviderError) -> Result<bool> {
        if !self.policy.should_retry(record, error) {
            return Ok(false);
        }

        let delay = self.policy.backoff_delay(record.retry_count);
        let now = Utc::now();
        let next_retry_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);

        let mut next = record.clone();
        next.schedule_retry(next_retry_at, now)?;
        let saved = self.store.save(&next, Some(record.version)).await?;
        *record = saved;

        info!(
            cash_out_id = %record.id,
            reference = %record.reference,
            provider = %record.provider,
            retry_count = record.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Scheduled cash-out retry"
        );
        self.notifier
            .audit(
                AuditEntry::cash_out(
                    "cash_out.retry_scheduled",
                    record,
                    format!("Retry {} scheduled after {}", record.retry_count, error.code),
                )
                .with_severity(AuditSeverity::Warning)
                .with_metadata("errorCode", serde_json::json!(error.code))
                .with_metadata("nextRetryAt", serde_json::json!(record.next_retry_at)),
            )
            .await;

        self.arm(record.id, delay);
        Ok(true)
    }

    /// Run one deferred attempt for the record with `id`
    pub async fn execute_retry(&self, id: Uuid) -> Result<RetryOutcome> {
        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Cash-out {} not found", id)))?;

        let now = Utc::now();
        if record.status != CashOutStatus::Processing {
            debug!(cash_out_id = %id, status = %record.status, "Retry skipped, not processing");
            return Ok(RetryOutcome::Skipped(SkipReason::NotProcessing(record.status)));
        }
        if !record.is_retry_due(now) {
            debug!(cash_out_id = %id, "Retry skipped, not due");
            return Ok(RetryOutcome::Skipped(SkipReason::NotDue));
        }

        let adapter = self.providers.get(record.provider)?;

        // Claim: whoever moves next_retry_at to the lease end first owns this attempt
        let mut claimed = record.clone();
        claimed.claim_retry(now, self.policy.lease_until(now))?;
        let claimed = match self.store.save(&claimed, Some(record.version)).await {
            Ok(saved) => saved,
            Err(e) if e.is_conflict() => {
                debug!(cash_out_id = %id, "Retry already claimed elsewhere");
                return Ok(RetryOutcome::Skipped(SkipReason::Conflict));
            }
            Err(e) => return Err(e),
        };

        info!(
            cash_out_id = %id,
            reference = %claimed.reference,
            provider = %claimed.provider,
            retry_count = claimed.retry_count,
            "Executing cash-out retry"
        );

        // An acknowledged payment is polled, never initiated a second time
        let call = match claimed.provider_transaction_id.as_deref() {
            Some(transaction_id) => adapter.check_status(transaction_id).await.map(ProviderCall::Polled),
            None => adapter.initiate(&claimed).await.map(ProviderCall::Initiated),
        };

        let attempt = match call {
            Ok(ProviderCall::Initiated(result)) => self.apply_initiation(claimed, result).await?,
            Ok(ProviderCall::Polled(report)) => self.apply_status_report(claimed, report).await?,
            Err(error) => self.handle_provider_error(claimed, error).await?,
        };
        Ok(attempt.outcome)
    }

    /// Apply an accepted initiation to `record` (status `processing`)
    pub async fn apply_initiation(&self, record: CashOutRecord, result: ProviderResult) -> Result<Attempt> {
        let now = Utc::now();
        let mut next = record.clone();
        next.record_acknowledgement(&result.provider_transaction_id, result.provider_response, now)?;
        let outcome = match result.status {
            ProviderStatus::Completed => {
                next.complete(None, now)?;
                RetryOutcome::Completed
            }
            ProviderStatus::Failed => {
                next.fail(PROVIDER_REPORTED_FAILURE, None, now)?;
                RetryOutcome::Failed {
                    reason: PROVIDER_REPORTED_FAILURE.to_string(),
                }
            }
            ProviderStatus::Pending | ProviderStatus::Processing => {
                next.release_claim(now);
                RetryOutcome::InFlight
            }
        };
        self.persist(next, record.version, outcome).await
    }

    async fn apply_status_report(&self, record: CashOutRecord, report: ProviderStatusReport) -> Result<Attempt> {
        let now = Utc::now();
        let mut next = record.clone();
        let outcome = match report.status {
            ProviderStatus::Completed => {
                next.complete(Some(report.provider_response), now)?;
                RetryOutcome::Completed
            }
            ProviderStatus::Failed => {
                let reason = report
                    .failure_reason
                    .unwrap_or_else(|| PROVIDER_REPORTED_FAILURE.to_string());
                next.fail(reason.clone(), Some(report.provider_response), now)?;
                RetryOutcome::Failed { reason }
            }
            ProviderStatus::Pending | ProviderStatus::Processing => {
                next.provider_response = Some(report.provider_response);
                next.release_claim(now);
                RetryOutcome::InFlight
            }
        };
        self.persist(next, record.version, outcome).await
    }

    /// Reschedule after a failed call, or fail the record when the policy declines
    pub async fn handle_provider_error(&self, record: CashOutRecord, error: ProviderError) -> Result<Attempt> {
        warn!(
            cash_out_id = %record.id,
            reference = %record.reference,
            provider = %record.provider,
            retry_count = record.retry_count,
            error = %error,
            "Provider call failed"
        );

        let mut scheduled = record.clone();
        match self.schedule_retry(&mut scheduled, &error).await {
            Ok(true) => {
                let outcome = RetryOutcome::Rescheduled {
                    retry_count: scheduled.retry_count,
                    next_retry_at: scheduled.next_retry_at.unwrap_or_else(Utc::now),
                };
                return Ok(Attempt {
                    outcome,
                    record: scheduled,
                });
            }
            Ok(false) => {}
            Err(e) if e.is_conflict() => return self.conflict(record.id).await,
            Err(e) => return Err(e),
        }

        let mut failed = record.clone();
        failed.fail(error.message.clone(), None, Utc::now())?;
        self.persist(
            failed,
            record.version,
            RetryOutcome::Failed {
                reason: error.message,
            },
        )
        .await
    }

    /// Conditionally save `next`, then notify if it reached a terminal status
    async fn persist(&self, next: CashOutRecord, expected_version: u64, outcome: RetryOutcome) -> Result<Attempt> {
        let saved = match self.store.save(&next, Some(expected_version)).await {
            Ok(saved) => saved,
            Err(e) if e.is_conflict() => return self.conflict(next.id).await,
            Err(e) => return Err(e),
        };

        match &outcome {
            RetryOutcome::Completed => {
                info!(cash_out_id = %saved.id, reference = %saved.reference, "Cash-out completed");
                self.notifier.publish_terminal(&saved).await;
                self.notifier
                    .audit(AuditEntry::cash_out("cash_out.completed", &saved, "Provider confirmed payout"))
                    .await;
            }
            RetryOutcome::Failed { reason } => {
                warn!(cash_out_id = %saved.id, reference = %saved.reference, reason = %reason, "Cash-out failed");
                self.notifier.publish_terminal(&saved).await;
                self.notifier
                    .audit(
                        AuditEntry::cash_out("cash_out.failed", &saved, reason.clone())
                            .with_status(AuditStatus::Failure)
                            .with_severity(AuditSeverity::Error),
                    )
                    .await;
            }
            _ => {}
        }

        Ok(Attempt {
            outcome,
            record: saved,
        })
    }

    async fn conflict(&self, id: Uuid) -> Result<Attempt> {
        let current = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Cash-out {} not found", id)))?;
        debug!(cash_out_id = %id, status = %current.status, "Lost write race, leaving record as is");
        Ok(Attempt {
            outcome: RetryOutcome::Skipped(SkipReason::Conflict),
            record: current,
        })
    }

    /// Execute every retry that has fallen due
    pub async fn process_pending_retries(&self) -> Result<RetrySweepResult> {
        let filter = CashOutFilter {
            statuses: vec![CashOutStatus::Processing],
            next_retry_due_by: Some(Utc::now()),
            // retry_count 0 is an interrupted first submission whose lease ran out
            max_retry_count: Some(self.policy.max_retries),
            ..CashOutFilter::default()
        };
        let due = self.store.find(&filter, None).await?;

        let mut result = RetrySweepResult {
            found: due.len(),
            ..RetrySweepResult::default()
        };
        for record in due {
            match self.execute_retry(record.id).await {
                Ok(RetryOutcome::Skipped(_)) => result.skipped += 1,
                Ok(_) => result.executed += 1,
                Err(e) => {
                    result.failed += 1;
                    error!(cash_out_id = %record.id, reference = %record.reference, error = %e, "Retry execution failed");
                }
            }
        }

        if result.found > 0 {
            info!(
                found = result.found,
                executed = result.executed,
                skipped = result.skipped,
                failed = result.failed,
                "Retry sweep finished"
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewCashOut, Provider};
    use rust_decimal::Decimal;

    fn record(retry_count: u32) -> CashOutRecord {
        let mut record = CashOutRecord::new(NewCashOut {
            user_id: "u".to_string(),
            wallet_id: "w".to_string(),
            amount: Decimal::new(100, 0),
            currency: "UGX".to_string(),
            fee: Decimal::ZERO,
            provider: Provider::MtnMomo,
            provider_account_id: "256700000000".to_string(),
            provider_account_name: None,
        });
        record.begin_processing(Utc::now()).unwrap();
        record.retry_count = retry_count;
        record
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(30_000));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(60_000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(120_000));
        assert_eq!(policy.backoff_delay(7), Duration::from_millis(3_600_000));
        assert_eq!(policy.backoff_delay(200), Duration::from_millis(3_600_000));
    }

    #[test]
    fn test_should_retry_transient_error() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&record(0), &ProviderError::network("reset")));
        assert!(policy.should_retry(&record(2), &ProviderError::timeout("slow")));
    }

    #[test]
    fn test_should_not_retry_when_exhausted() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&record(3), &ProviderError::network("reset")));
    }

    #[test]
    fn test_should_not_retry_terminal_record() {
        let policy = RetryPolicy::default();
        let mut rec = record(0);
        rec.complete(None, Utc::now()).unwrap();
        assert!(!policy.should_retry(&rec, &ProviderError::network("reset")));
    }

    #[test]
    fn test_should_not_retry_unlisted_or_business_errors() {
        let policy = RetryPolicy::default();
        let rec = record(0);
        assert!(!policy.should_retry(&rec, &ProviderError::unknown("boom")));
        assert!(!policy.should_retry(
            &rec,
            &ProviderError::new(ProviderErrorCode::InsufficientFunds, "no funds")
        ));
        // Retryable code, but the message says it is a rejection
        assert!(!policy.should_retry(
            &rec,
            &ProviderError::new(ProviderErrorCode::TemporaryFailure, "Invalid account number")
        ));
    }

    #[test]
    fn test_lease_until_saturates() {
        let now = Utc::now();
        let policy = RetryPolicy::default();
        assert_eq!(policy.lease_until(now), now + chrono::Duration::seconds(120));

        let policy = RetryPolicy {
            claim_lease_ms: u64::MAX,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.lease_until(now), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_custom_retryable_codes() {
        let policy = RetryPolicy {
            retryable_codes: [ProviderErrorCode::Unknown].into_iter().collect(),
            ..RetryPolicy::default()
        };
        assert!(policy.should_retry(&record(0), &ProviderError::unknown("flaky")));
        assert!(!policy.should_retry(&record(0), &ProviderError::network("reset")));
    }
}
