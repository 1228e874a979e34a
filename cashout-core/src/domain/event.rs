//! Domain events and audit entries emitted by the engines

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::cash_out::{CashOutRecord, CashOutStatus};
use super::provider::Provider;

pub const CASH_OUT_COMPLETED: &str = "cash_out.completed";
pub const CASH_OUT_FAILED: &str = "cash_out.failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashOutEventKind {
    #[serde(rename = "cash_out.completed")]
    Completed,
    #[serde(rename = "cash_out.failed")]
    Failed,
}

/// Event published when a cash-out reaches `completed` or `failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashOutEvent {
    pub kind: CashOutEventKind,
    pub cash_out_id: Uuid,
    pub reference: String,
    pub user_id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub provider: Provider,
    pub provider_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl CashOutEvent {
    /// Build the event for a record that just entered a terminal status.
    ///
    /// Returns `None` for statuses that do not publish (cancelled, in-flight).
    pub fn for_record(record: &CashOutRecord) -> Option<Self> {
        let kind = match record.status {
            CashOutStatus::Completed => CashOutEventKind::Completed,
            CashOutStatus::Failed => CashOutEventKind::Failed,
            _ => return None,
        };
        Some(Self {
            kind,
            cash_out_id: record.id,
            reference: record.reference.clone(),
            user_id: record.user_id.clone(),
            wallet_id: record.wallet_id.clone(),
            amount: record.amount,
            fee: record.fee,
            currency: record.currency.clone(),
            provider: record.provider,
            provider_transaction_id: record.provider_transaction_id.clone(),
            failure_reason: record.failure_reason.clone(),
            occurred_at: record.updated_at,
        })
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            CashOutEventKind::Completed => CASH_OUT_COMPLETED,
            CashOutEventKind::Failed => CASH_OUT_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Error => "error",
            AuditSeverity::Critical => "critical",
        }
    }
}

/// An audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub description: String,
    pub metadata: JsonValue,
    pub status: AuditStatus,
    pub severity: AuditSeverity,
}

impl AuditEntry {
    /// Audit entry about a cash-out record
    pub fn cash_out(action: impl Into<String>, record: &CashOutRecord, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: "cash_out".to_string(),
            resource_id: record.id.to_string(),
            description: description.into(),
            metadata: serde_json::json!({
                "reference": record.reference,
                "provider": record.provider,
                "status": record.status,
                "retryCount": record.retry_count,
                "providerTransactionId": record.provider_transaction_id,
            }),
            status: AuditStatus::Success,
            severity: AuditSeverity::Info,
        }
    }

    pub fn with_status(mut self, status: AuditStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Merge extra keys into the metadata object
    pub fn with_metadata(mut self, key: &str, value: JsonValue) -> Self {
        if let JsonValue::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cash_out::NewCashOut;

    fn processing_record() -> CashOutRecord {
        let mut record = CashOutRecord::new(NewCashOut {
            user_id: "u".to_string(),
            wallet_id: "w".to_string(),
            amount: Decimal::new(1000, 0),
            currency: "KES".to_string(),
            fee: Decimal::new(10, 0),
            provider: Provider::AirtelMoney,
            provider_account_id: "254700000000".to_string(),
            provider_account_name: None,
        });
        record.begin_processing(Utc::now()).unwrap();
        record
    }

    #[test]
    fn test_no_event_for_non_terminal_or_cancelled() {
        let record = processing_record();
        assert!(CashOutEvent::for_record(&record).is_none());
    }

    #[test]
    fn test_event_names() {
        let mut record = processing_record();
        record.complete(None, Utc::now()).unwrap();
        let event = CashOutEvent::for_record(&record).unwrap();
        assert_eq!(event.name(), "cash_out.completed");
        assert_eq!(
            serde_json::to_value(event.kind).unwrap(),
            serde_json::json!("cash_out.completed")
        );

        let mut record = processing_record();
        record.fail("TF", None, Utc::now()).unwrap();
        let event = CashOutEvent::for_record(&record).unwrap();
        assert_eq!(event.name(), CASH_OUT_FAILED);
        assert_eq!(event.failure_reason.as_deref(), Some("TF"));
    }

    #[test]
    fn test_audit_entry_metadata() {
        let record = processing_record();
        let entry = AuditEntry::cash_out("cash_out.reconciled", &record, "Reconciled")
            .with_metadata("previousStatus", serde_json::json!("pending"))
            .with_severity(AuditSeverity::Warning);
        assert_eq!(entry.resource_type, "cash_out");
        assert_eq!(entry.metadata["reference"], serde_json::json!(record.reference));
        assert_eq!(entry.metadata["previousStatus"], serde_json::json!("pending"));
        assert_eq!(entry.severity, AuditSeverity::Warning);
    }
}
