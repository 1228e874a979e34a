//! Cash-out record and its state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::provider::Provider;
use super::result::{Error, Result};

/// Lifecycle status of a cash-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CashOutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl CashOutStatus {
    pub const ALL: [CashOutStatus; 5] = [
        CashOutStatus::Pending,
        CashOutStatus::Processing,
        CashOutStatus::Completed,
        CashOutStatus::Failed,
        CashOutStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CashOutStatus::Pending => "pending",
            CashOutStatus::Processing => "processing",
            CashOutStatus::Completed => "completed",
            CashOutStatus::Failed => "failed",
            CashOutStatus::Cancelled => "cancelled",
        }
    }

    /// No transition out of a terminal status is legal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CashOutStatus::Completed | CashOutStatus::Failed | CashOutStatus::Cancelled
        )
    }
}

impl fmt::Display for CashOutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CashOutStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CashOutStatus::Pending),
            "processing" => Ok(CashOutStatus::Processing),
            "completed" => Ok(CashOutStatus::Completed),
            "failed" => Ok(CashOutStatus::Failed),
            "cancelled" => Ok(CashOutStatus::Cancelled),
            other => Err(format!("Unknown cash-out status: {}", other)),
        }
    }
}

/// Request-intake payload for a new cash-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCashOut {
    pub user_id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub fee: Decimal,
    pub provider: Provider,
    pub provider_account_id: String,
    #[serde(default)]
    pub provider_account_name: Option<String>,
}

impl NewCashOut {
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() || self.wallet_id.trim().is_empty() {
            return Err(Error::validation("user_id and wallet_id are required"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(Error::validation("amount must be greater than zero"));
        }
        if self.fee < Decimal::ZERO {
            return Err(Error::validation("fee cannot be negative"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::validation(format!(
                "currency must be a 3-letter ISO code, got '{}'",
                self.currency
            )));
        }
        if self.provider_account_id.trim().is_empty() {
            return Err(Error::validation("provider_account_id is required"));
        }
        Ok(())
    }
}

/// One outbound payment attempt, the unit of consistency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashOutRecord {
    pub id: Uuid,
    pub user_id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub fee: Decimal,
    pub provider: Provider,
    pub provider_account_id: String,
    pub provider_account_name: Option<String>,
    /// Set once the provider acknowledges the request
    pub provider_transaction_id: Option<String>,
    /// Globally unique correlation key, assigned once at creation
    pub reference: String,
    pub status: CashOutStatus,
    /// Last-seen provider payload, kept for audit only
    pub provider_response: Option<JsonValue>,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Row version for conditional writes
    pub version: u64,
}

impl CashOutRecord {
    /// Build a pending record from an intake request
    pub fn new(request: NewCashOut) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            wallet_id: request.wallet_id,
            amount: request.amount,
            currency: request.currency.to_uppercase(),
            fee: request.fee,
            provider: request.provider,
            provider_account_id: request.provider_account_id,
            provider_account_name: request.provider_account_name,
            provider_transaction_id: None,
            reference: generate_reference(now),
            status: CashOutStatus::Pending,
            provider_response: None,
            failure_reason: None,
            retry_count: 0,
            last_retry_at: None,
            next_retry_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Replace the reference after a uniqueness collision on insert
    pub(crate) fn regenerate_reference(&mut self) {
        self.reference = generate_reference(self.created_at);
    }

    /// Whether a retry is scheduled and due at `now`
    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CashOutStatus::Processing
            && self.next_retry_at.map(|at| at <= now).unwrap_or(false)
    }

    fn ensure_not_terminal(&self, to: CashOutStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::invalid_transition(self.status, to));
        }
        Ok(())
    }

    /// pending -> processing, on the first provider call attempt
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != CashOutStatus::Pending {
            return Err(Error::invalid_transition(self.status, CashOutStatus::Processing));
        }
        self.status = CashOutStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    /// Record the provider's acknowledgement of an initiated payment
    pub fn record_acknowledgement(
        &mut self,
        provider_transaction_id: &str,
        response: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_not_terminal(self.status)?;
        if self.provider_transaction_id.is_none() {
            self.provider_transaction_id = Some(provider_transaction_id.to_string());
        }
        self.provider_response = Some(response);
        self.updated_at = now;
        Ok(())
    }

    /// processing -> processing with one more attempt scheduled
    pub fn schedule_retry(&mut self, next_retry_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_terminal(CashOutStatus::Processing)?;
        if self.status == CashOutStatus::Pending {
            self.status = CashOutStatus::Processing;
        }
        self.retry_count += 1;
        self.last_retry_at = Some(now);
        self.next_retry_at = Some(next_retry_at);
        self.updated_at = now;
        Ok(())
    }

    /// Mark a due retry as in flight until `lease_until`.
    ///
    /// Nobody else sees the record as due before then. An attempt that
    /// never reports back lets it fall due again when the lease runs out.
    pub fn claim_retry(&mut self, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<()> {
        if self.status != CashOutStatus::Processing {
            return Err(Error::invalid_transition(self.status, CashOutStatus::Processing));
        }
        self.last_retry_at = Some(now);
        self.next_retry_at = Some(lease_until);
        self.updated_at = now;
        Ok(())
    }

    /// Drop the lease once the provider has the payment; reconciliation takes it from here
    pub fn release_claim(&mut self, now: DateTime<Utc>) {
        self.next_retry_at = None;
        self.updated_at = now;
    }

    /// processing -> completed
    pub fn complete(&mut self, response: Option<JsonValue>, now: DateTime<Utc>) -> Result<()> {
        if self.status != CashOutStatus::Processing {
            return Err(Error::invalid_transition(self.status, CashOutStatus::Completed));
        }
        self.status = CashOutStatus::Completed;
        if response.is_some() {
            self.provider_response = response;
        }
        self.completed_at = Some(now);
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// processing -> failed
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        response: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != CashOutStatus::Processing {
            return Err(Error::invalid_transition(self.status, CashOutStatus::Failed));
        }
        self.status = CashOutStatus::Failed;
        self.failure_reason = Some(reason.into());
        if response.is_some() {
            self.provider_response = response;
        }
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// pending -> cancelled; the only cancellation path
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != CashOutStatus::Pending {
            return Err(Error::invalid_transition(self.status, CashOutStatus::Cancelled));
        }
        self.status = CashOutStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }
}

/// Generate a correlation reference: CO-YYYYMMDD-XXXXXXXXXXXX
fn generate_reference(at: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("CO-{}-{}", at.format("%Y%m%d"), suffix)
}
