//! Reconciliation engine - converge local records with provider state
//!
//! Periodically asks the provider about every recent non-terminal cash-out
//! and applies whatever the provider says happened. Each record commits on
//! its own conditional write, so a record reported as updated stays updated
//! whatever happens to the rest of the batch.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notifier::Notifier;
use super::retry::PROVIDER_REPORTED_FAILURE;
use crate::domain::result::{Error, Result};
use crate::domain::{
    AuditEntry, AuditSeverity, CashOutRecord, CashOutStatus, Provider, ProviderStatus,
};
use crate::ports::{CashOutFilter, CashOutStore, ProviderRegistry};

/// Options for one reconciliation run
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOptions {
    /// Restrict the run to one provider
    pub provider: Option<Provider>,
    /// Ignore records created longer ago than this
    pub max_age_days: i64,
    pub batch_size: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            provider: None,
            max_age_days: 7,
            batch_size: 100,
        }
    }
}

/// What reconciliation did to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Updated,
    Unchanged,
    /// No provider transaction id; the provider was not asked
    Skipped,
    /// Another engine changed the record first
    Conflict,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileDetail {
    pub cash_out_id: Uuid,
    pub reference: String,
    pub action: ReconcileAction,
    pub previous_status: CashOutStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<CashOutStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<ProviderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReconcileDetail {
    fn new(record: &CashOutRecord, action: ReconcileAction) -> Self {
        Self {
            cash_out_id: record.id,
            reference: record.reference.clone(),
            action,
            previous_status: record.status,
            new_status: None,
            provider_status: None,
            message: None,
        }
    }
}

/// Counters and details for one run.
///
/// `total = processed + skipped` and `total = updated + unchanged + failed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub provider: Option<Provider>,
    pub total: usize,
    /// Records whose provider status was checked
    pub processed: usize,
    pub updated: usize,
    /// Includes skipped records and lost write races
    pub unchanged: usize,
    pub failed: usize,
    pub details: Vec<ReconcileDetail>,
}

impl ReconciliationResult {
    fn record(&mut self, detail: ReconcileDetail) {
        match detail.action {
            ReconcileAction::Updated => {
                self.processed += 1;
                self.updated += 1;
            }
            ReconcileAction::Unchanged | ReconcileAction::Conflict => {
                self.processed += 1;
                self.unchanged += 1;
            }
            ReconcileAction::Skipped => self.unchanged += 1,
            ReconcileAction::Error => {
                self.processed += 1;
                self.failed += 1;
            }
        }
        self.details.push(detail);
    }
}

/// Per-provider outcome of `reconcile_all_providers`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderReconciliation {
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ReconciliationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report date range, inclusive of both calendar days
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub provider: Option<Provider>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportTotals {
    pub count: u64,
    pub total_amount: Decimal,
    pub total_fees: Decimal,
}

impl ReportTotals {
    fn add(&mut self, record: &CashOutRecord) {
        self.count += 1;
        self.total_amount += record.amount;
        self.total_fees += record.fee;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusTotals {
    pub status: CashOutStatus,
    #[serde(flatten)]
    pub totals: ReportTotals,
}

/// Read-only summary of cash-outs in a date range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub provider: Option<Provider>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub by_status: Vec<StatusTotals>,
    pub total: ReportTotals,
    pub generated_at: DateTime<Utc>,
}

pub struct ReconciliationEngine {
    store: Arc<dyn CashOutStore>,
    providers: ProviderRegistry,
    notifier: Notifier,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn CashOutStore>, providers: ProviderRegistry, notifier: Notifier) -> Self {
        Self {
            store,
            providers,
            notifier,
        }
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.providers.providers()
    }

    /// Reconcile one batch of recent pending and processing records.
    ///
    /// Records the provider has acknowledged fill the batch first. Records
    /// that were never submitted only take up what is left, and are skipped.
    pub async fn reconcile_pending(&self, options: &ReconcileOptions) -> Result<ReconciliationResult> {
        let created_from = created_since(options.max_age_days)?;
        let filter = CashOutFilter {
            statuses: vec![CashOutStatus::Pending, CashOutStatus::Processing],
            provider: options.provider,
            created_from: Some(created_from),
            ..CashOutFilter::default()
        };
        let mut batch = self
            .store
            .find(
                &CashOutFilter {
                    acknowledged: Some(true),
                    ..filter.clone()
                },
                Some(options.batch_size),
            )
            .await?;
        let remaining = options.batch_size.saturating_sub(batch.len());
        if remaining > 0 {
            let unsubmitted = CashOutFilter {
                acknowledged: Some(false),
                ..filter
            };
            batch.extend(self.store.find(&unsubmitted, Some(remaining)).await?);
        }

        let mut result = ReconciliationResult {
            provider: options.provider,
            total: batch.len(),
            ..ReconciliationResult::default()
        };

        for record in &batch {
            let detail = match self.reconcile_record(record).await {
                Ok(detail) => detail,
                Err(e) => {
                    error!(
                        cash_out_id = %record.id,
                        reference = %record.reference,
                        provider = %record.provider,
                        error = %e,
                        "Reconciliation failed for cash-out"
                    );
                    ReconcileDetail {
                        message: Some(e.to_string()),
                        ..ReconcileDetail::new(record, ReconcileAction::Error)
                    }
                }
            };
            result.record(detail);
        }

        info!(
            provider = ?options.provider,
            total = result.total,
            processed = result.processed,
            updated = result.updated,
            unchanged = result.unchanged,
            failed = result.failed,
            "Reconciliation run finished"
        );
        Ok(result)
    }

    async fn reconcile_record(&self, record: &CashOutRecord) -> Result<ReconcileDetail> {
        let Some(transaction_id) = record.provider_transaction_id.as_deref() else {
            return Ok(ReconcileDetail {
                message: Some("No provider transaction id".to_string()),
                ..ReconcileDetail::new(record, ReconcileAction::Skipped)
            });
        };

        let adapter = self.providers.get(record.provider)?;
        let report = adapter.check_status(transaction_id).await?;

        let now = Utc::now();
        let mut next = record.clone();
        let changed = match (report.status, record.status) {
            (ProviderStatus::Completed, _) => {
                if next.status == CashOutStatus::Pending {
                    next.begin_processing(now)?;
                }
                next.complete(Some(report.provider_response), now)?;
                true
            }
            (ProviderStatus::Failed, _) => {
                if next.status == CashOutStatus::Pending {
                    next.begin_processing(now)?;
                }
                let reason = report
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| PROVIDER_REPORTED_FAILURE.to_string());
                next.fail(reason, Some(report.provider_response), now)?;
                true
            }
            (ProviderStatus::Processing, CashOutStatus::Pending) => {
                next.begin_processing(now)?;
                next.provider_response = Some(report.provider_response);
                true
            }
            _ => false,
        };

        let detail = ReconcileDetail {
            provider_status: Some(report.status),
            ..ReconcileDetail::new(record, ReconcileAction::Unchanged)
        };
        if !changed {
            return Ok(detail);
        }

        let saved = match self.store.save(&next, Some(record.version)).await {
            Ok(saved) => saved,
            Err(e) if e.is_conflict() => {
                debug!(cash_out_id = %record.id, "Record changed during reconciliation");
                return Ok(ReconcileDetail {
                    action: ReconcileAction::Conflict,
                    message: Some("Record changed concurrently".to_string()),
                    ..detail
                });
            }
            Err(e) => return Err(e),
        };

        info!(
            cash_out_id = %saved.id,
            reference = %saved.reference,
            provider = %saved.provider,
            from = %record.status,
            to = %saved.status,
            "Reconciled cash-out"
        );

        self.notifier.publish_terminal(&saved).await;
        let severity = if saved.status == CashOutStatus::Failed {
            AuditSeverity::Warning
        } else {
            AuditSeverity::Info
        };
        self.notifier
            .audit(
                AuditEntry::cash_out(
                    "cash_out.reconciled",
                    &saved,
                    format!("Reconciled from {} to {}", record.status, saved.status),
                )
                .with_severity(severity)
                .with_metadata("previousStatus", serde_json::json!(record.status))
                .with_metadata("providerStatus", serde_json::json!(report.status)),
            )
            .await;

        Ok(ReconcileDetail {
            action: ReconcileAction::Updated,
            new_status: Some(saved.status),
            message: saved.failure_reason.clone(),
            ..detail
        })
    }

    /// Run `reconcile_pending` once per registered provider.
    ///
    /// One provider failing does not stop the others.
    pub async fn reconcile_all_providers(&self, options: &ReconcileOptions) -> Vec<ProviderReconciliation> {
        let mut results = Vec::new();
        for provider in self.providers.providers() {
            let provider_options = ReconcileOptions {
                provider: Some(provider),
                ..options.clone()
            };
            match self.reconcile_pending(&provider_options).await {
                Ok(result) => results.push(ProviderReconciliation {
                    provider,
                    result: Some(result),
                    error: None,
                }),
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Reconciliation run failed for provider");
                    results.push(ProviderReconciliation {
                        provider,
                        result: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        results
    }

    /// Totals per status for cash-outs created in the range
    pub async fn generate_report(&self, options: &ReportOptions) -> Result<ReconciliationReport> {
        if options.start_date > options.end_date {
            return Err(Error::validation(format!(
                "start date {} is after end date {}",
                options.start_date, options.end_date
            )));
        }

        let day_end = options
            .end_date
            .succ_opt()
            .ok_or_else(|| Error::validation("end date out of range"))?;
        let filter = CashOutFilter {
            provider: options.provider,
            created_from: Some(options.start_date.and_time(NaiveTime::MIN).and_utc()),
            created_to: Some(day_end.and_time(NaiveTime::MIN).and_utc()),
            ..CashOutFilter::default()
        };
        let records = self.store.find(&filter, None).await?;

        let mut by_status: Vec<StatusTotals> = Vec::new();
        let mut total = ReportTotals::default();
        for record in &records {
            total.add(record);
            match by_status.iter_mut().find(|s| s.status == record.status) {
                Some(entry) => entry.totals.add(record),
                None => {
                    let mut totals = ReportTotals::default();
                    totals.add(record);
                    by_status.push(StatusTotals {
                        status: record.status,
                        totals,
                    });
                }
            }
        }
        by_status.sort_by_key(|s| s.status);

        Ok(ReconciliationReport {
            provider: options.provider,
            start_date: options.start_date,
            end_date: options.end_date,
            by_status,
            total,
            generated_at: Utc::now(),
        })
    }
}

/// Lower bound on `created_at` for records at most `max_age_days` old
fn created_since(max_age_days: i64) -> Result<DateTime<Utc>> {
    if max_age_days < 0 {
        return Err(Error::validation(format!(
            "max_age_days must not be negative, got {}",
            max_age_days
        )));
    }
    Duration::try_days(max_age_days)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .ok_or_else(|| Error::validation(format!("max_age_days {} is out of range", max_age_days)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewCashOut;

    fn record() -> CashOutRecord {
        CashOutRecord::new(NewCashOut {
            user_id: "u".to_string(),
            wallet_id: "w".to_string(),
            amount: Decimal::new(100, 0),
            currency: "UGX".to_string(),
            fee: Decimal::ZERO,
            provider: Provider::MtnMomo,
            provider_account_id: "256700000000".to_string(),
            provider_account_name: None,
        })
    }

    #[test]
    fn test_created_since_bounds() {
        let since = created_since(7).unwrap();
        let expected = Utc::now() - Duration::days(7);
        assert!((expected - since).num_seconds().abs() < 5);

        assert!(matches!(created_since(-1), Err(Error::Validation(_))));
        assert!(matches!(created_since(i64::MAX), Err(Error::Validation(_))));
        // In range for TimeDelta but earlier than any representable date
        assert!(matches!(created_since(100_000_000), Err(Error::Validation(_))));
    }

    #[test]
    fn test_result_counters_balance() {
        let rec = record();
        let mut result = ReconciliationResult {
            total: 5,
            ..ReconciliationResult::default()
        };
        for action in [
            ReconcileAction::Updated,
            ReconcileAction::Unchanged,
            ReconcileAction::Skipped,
            ReconcileAction::Conflict,
            ReconcileAction::Error,
        ] {
            result.record(ReconcileDetail::new(&rec, action));
        }

        assert_eq!(result.processed, 4);
        assert_eq!(result.updated, 1);
        assert_eq!(result.unchanged, 3);
        assert_eq!(result.failed, 1);
        let skipped = result
            .details
            .iter()
            .filter(|d| d.action == ReconcileAction::Skipped)
            .count();
        assert_eq!(result.total, result.processed + skipped);
        assert_eq!(result.total, result.updated + result.unchanged + result.failed);
    }

    #[test]
    fn test_default_options() {
        let options = ReconcileOptions::default();
        assert_eq!(options.max_age_days, 7);
        assert_eq!(options.batch_size, 100);
        assert!(options.provider.is_none());
    }
}
