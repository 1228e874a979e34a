//! Integration tests for cash-out intake, submission and cancellation
//!
//! Network IO is mocked at the trait level, but all database operations are real.
//!
//! Run with: cargo test --test cash_out_flow_test -- --nocapture

mod common;

use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::sleep;

use cashout_core::adapters::SandboxProvider;
use cashout_core::domain::{
    CashOutEventKind, CashOutStatus, Provider, ProviderError, ProviderErrorCode, ProviderStatus,
};
use cashout_core::services::RetryPolicy;
use cashout_core::Error;

use common::{drain, request, Harness};

#[tokio::test]
async fn test_create_persists_pending_record() {
    let h = Harness::new();
    let record = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();

    assert_eq!(record.status, CashOutStatus::Pending);
    assert_eq!(record.retry_count, 0);
    assert!(record.reference.starts_with("CO-"));

    let by_id = h.cash_outs.get(record.id).await.unwrap();
    assert_eq!(by_id.reference, record.reference);
    let by_reference = h.cash_outs.find(&record.reference).await.unwrap();
    assert_eq!(by_reference.id, record.id);
    let by_key = h.cash_outs.find(&record.id.to_string()).await.unwrap();
    assert_eq!(by_key.id, record.id);

    assert_eq!(h.audit_actions(&record), vec!["cash_out.created"]);
}

#[tokio::test]
async fn test_create_rejects_invalid_requests() {
    let h = Harness::new();

    let mut zero = request(Provider::MtnMomo);
    zero.amount = Decimal::ZERO;
    assert!(matches!(h.cash_outs.create(zero).await, Err(Error::Validation(_))));

    let mut currency = request(Provider::MtnMomo);
    currency.currency = "SHILLING".to_string();
    assert!(matches!(h.cash_outs.create(currency).await, Err(Error::Validation(_))));

    let summary = h.cash_outs.status_summary().await.unwrap();
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn test_unknown_cash_out_is_not_found() {
    let h = Harness::new();
    assert!(matches!(h.cash_outs.find("CO-20260101-NOPE").await, Err(Error::NotFound(_))));
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn test_submit_accepted_payment_stays_in_flight() {
    let h = Harness::new();
    let record = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();

    let submitted = h.cash_outs.submit(record.id).await.unwrap();
    assert_eq!(submitted.status, CashOutStatus::Processing);
    assert_eq!(
        submitted.provider_transaction_id,
        Some(SandboxProvider::transaction_id_for(&record.reference))
    );
    assert!(submitted.next_retry_at.is_none());
    assert_eq!(h.mtn.initiate_calls(), vec![record.reference.clone()]);
}

#[tokio::test]
async fn test_submit_completed_payment_publishes_event() {
    let h = Harness::new();
    let mut events = h.subscribe();
    h.mtn.accept_next(ProviderStatus::Completed);
    let record = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();

    let submitted = h.cash_outs.submit(record.id).await.unwrap();
    assert_eq!(submitted.status, CashOutStatus::Completed);

    let published = drain(&mut events);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].kind, CashOutEventKind::Completed);
    assert_eq!(published[0].reference, record.reference);
    assert_eq!(published[0].amount, record.amount);
    assert_eq!(h.audit_actions(&record), vec!["cash_out.created", "cash_out.completed"]);
}

#[tokio::test]
async fn test_submit_transient_failure_schedules_first_retry() {
    let h = Harness::new();
    h.mtn.fail_next(ProviderError::network("connection refused"));
    let record = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();

    let submitted = h.cash_outs.submit(record.id).await.unwrap();
    assert_eq!(submitted.status, CashOutStatus::Processing);
    assert_eq!(submitted.retry_count, 1);
    assert!(submitted.next_retry_at.is_some());
    assert!(submitted.provider_transaction_id.is_none());
}

#[tokio::test]
async fn test_submit_rejection_fails_immediately() {
    let h = Harness::new();
    let mut events = h.subscribe();
    h.airtel.fail_next(ProviderError::new(
        ProviderErrorCode::InvalidAccount,
        "Invalid account number",
    ));
    let record = h.cash_outs.create(request(Provider::AirtelMoney)).await.unwrap();

    let submitted = h.cash_outs.submit(record.id).await.unwrap();
    assert_eq!(submitted.status, CashOutStatus::Failed);
    assert_eq!(submitted.failure_reason.as_deref(), Some("Invalid account number"));
    assert_eq!(submitted.retry_count, 0);

    let published = drain(&mut events);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].kind, CashOutEventKind::Failed);
}

#[tokio::test]
async fn test_submit_is_a_no_op_unless_pending() {
    let h = Harness::new();
    let record = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();
    let first = h.cash_outs.submit(record.id).await.unwrap();

    let second = h.cash_outs.submit(record.id).await.unwrap();
    assert_eq!(second.version, first.version);
    assert_eq!(h.mtn.initiate_calls().len(), 1);
}

#[tokio::test]
async fn test_interrupted_submit_is_swept_once_lease_expires() {
    let h = Harness::build(
        SandboxProvider::new(Provider::MtnMomo).with_latency(Duration::from_millis(300)),
        RetryPolicy {
            claim_lease_ms: 50,
            ..RetryPolicy::default()
        },
    );
    let record = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();

    let cash_outs = h.cash_outs.clone();
    let id = record.id;
    let submit = tokio::spawn(async move { cash_outs.submit(id).await });
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.mtn.initiate_calls().len(), 1);
    submit.abort();
    let _ = submit.await;

    let stranded = h.reload(&record).await;
    assert_eq!(stranded.status, CashOutStatus::Processing);
    assert_eq!(stranded.retry_count, 0);
    assert!(stranded.provider_transaction_id.is_none());
    assert!(stranded.next_retry_at.is_some());

    let result = h.retry.process_pending_retries().await.unwrap();
    assert_eq!(result.found, 1);
    assert_eq!(result.executed, 1);

    let recovered = h.reload(&record).await;
    assert_eq!(
        recovered.provider_transaction_id,
        Some(SandboxProvider::transaction_id_for(&record.reference))
    );
    assert!(recovered.next_retry_at.is_none());
    assert_eq!(
        h.mtn.initiate_calls(),
        vec![record.reference.clone(), record.reference.clone()]
    );
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_pending() {
    let h = Harness::new();
    let record = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();

    let cancelled = h.cash_outs.cancel(record.id).await.unwrap();
    assert_eq!(cancelled.status, CashOutStatus::Cancelled);
    assert_eq!(h.audit_actions(&record), vec!["cash_out.created", "cash_out.cancelled"]);

    // Cancelled is terminal
    let err = h.cash_outs.cancel(record.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    let resubmitted = h.cash_outs.submit(record.id).await.unwrap();
    assert_eq!(resubmitted.status, CashOutStatus::Cancelled);
    assert!(h.mtn.initiate_calls().is_empty());
}

#[tokio::test]
async fn test_cancel_completed_is_invalid() {
    let h = Harness::new();
    h.mtn.accept_next(ProviderStatus::Completed);
    let record = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();
    h.cash_outs.submit(record.id).await.unwrap();

    let err = h.cash_outs.cancel(record.id).await.unwrap_err();
    match err {
        Error::InvalidTransition { from, to } => {
            assert_eq!(from, CashOutStatus::Completed);
            assert_eq!(to, CashOutStatus::Cancelled);
        }
        other => panic!("expected invalid transition, got {:?}", other),
    }
    assert_eq!(h.reload(&record).await.status, CashOutStatus::Completed);
}

#[tokio::test]
async fn test_status_summary_counts() {
    let h = Harness::new();
    h.mtn.accept_next(ProviderStatus::Completed);
    let a = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();
    h.cash_outs.submit(a.id).await.unwrap();
    let b = h.cash_outs.create(request(Provider::MtnMomo)).await.unwrap();
    h.cash_outs.cancel(b.id).await.unwrap();
    h.cash_outs.create(request(Provider::AirtelMoney)).await.unwrap();

    let summary = h.cash_outs.status_summary().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.count(CashOutStatus::Completed), 1);
    assert_eq!(summary.count(CashOutStatus::Cancelled), 1);
    assert_eq!(summary.count(CashOutStatus::Pending), 1);
    assert_eq!(summary.count(CashOutStatus::Failed), 0);
}
