//! Provider domain types
//!
//! Everything the core knows about an external payment provider: which
//! provider a cash-out goes through, what a provider call returns, and how a
//! provider failure is classified for retry purposes.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// External mobile-money provider a cash-out is paid out through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    MtnMomo,
    AirtelMoney,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::MtnMomo, Provider::AirtelMoney];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::MtnMomo => "mtn_momo",
            Provider::AirtelMoney => "airtel_money",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mtn_momo" | "mtn" | "momo" => Ok(Provider::MtnMomo),
            "airtel_money" | "airtel" => Ok(Provider::AirtelMoney),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

/// Status of a payment as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Acknowledgement of an initiated payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider_transaction_id: String,
    pub status: ProviderStatus,
    pub provider_response: JsonValue,
}

/// Out-of-band status check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatusReport {
    pub status: ProviderStatus,
    pub provider_response: JsonValue,
    pub failure_reason: Option<String>,
}

/// Failure codes a provider call can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorCode {
    // Transient
    NetworkError,
    Timeout,
    ProviderUnavailable,
    TemporaryFailure,
    RateLimited,
    ServiceUnavailable,
    // Business rejections
    InvalidAccount,
    InsufficientFunds,
    AccountNotFound,
    InvalidAmount,
    ValidationFailed,
    /// Provider failed without a structured code
    Unknown,
}

impl ProviderErrorCode {
    /// Codes retried when no explicit configuration is given
    pub const DEFAULT_RETRYABLE: [ProviderErrorCode; 6] = [
        ProviderErrorCode::NetworkError,
        ProviderErrorCode::Timeout,
        ProviderErrorCode::ProviderUnavailable,
        ProviderErrorCode::TemporaryFailure,
        ProviderErrorCode::RateLimited,
        ProviderErrorCode::ServiceUnavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorCode::NetworkError => "NETWORK_ERROR",
            ProviderErrorCode::Timeout => "TIMEOUT",
            ProviderErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ProviderErrorCode::TemporaryFailure => "TEMPORARY_FAILURE",
            ProviderErrorCode::RateLimited => "RATE_LIMITED",
            ProviderErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ProviderErrorCode::InvalidAccount => "INVALID_ACCOUNT",
            ProviderErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ProviderErrorCode::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ProviderErrorCode::InvalidAmount => "INVALID_AMOUNT",
            ProviderErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ProviderErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            ProviderErrorCode::InvalidAccount
                | ProviderErrorCode::InsufficientFunds
                | ProviderErrorCode::AccountNotFound
                | ProviderErrorCode::InvalidAmount
                | ProviderErrorCode::ValidationFailed
        )
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a provider adapter call
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unknown, message)
    }
}

/// How a provider failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth another attempt if the code is configured as retryable
    Transient,
    /// The provider rejected the payment on business grounds
    BusinessRejection,
}

fn business_failure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)invalid[\s_-]*account|insufficient[\s_-]*funds|account[\s_-]*not[\s_-]*found|invalid[\s_-]*amount|validation[\s_-]*failed",
        )
        .expect("business failure pattern is a valid regex")
    })
}

/// Classify a provider failure.
///
/// Structured business codes always win. Providers that only return free
/// text are matched on the message, so "Insufficient funds in wallet" is a
/// rejection even when it arrives as `UNKNOWN` or `TEMPORARY_FAILURE`.
pub fn classify_failure(error: &ProviderError) -> FailureKind {
    if error.code.is_business_rejection() || business_failure_pattern().is_match(&error.message) {
        FailureKind::BusinessRejection
    } else {
        FailureKind::Transient
    }
}

/// Best-effort mapping of a provider's free-text reason to a structured code
pub fn code_from_reason(reason: &str) -> Option<ProviderErrorCode> {
    let lower = reason.to_lowercase().replace(['_', '-'], " ");
    if lower.contains("insufficient funds") || lower.contains("not enough funds") {
        Some(ProviderErrorCode::InsufficientFunds)
    } else if lower.contains("account not found") || lower.contains("payee not found") {
        Some(ProviderErrorCode::AccountNotFound)
    } else if lower.contains("invalid account") || lower.contains("invalid msisdn") {
        Some(ProviderErrorCode::InvalidAccount)
    } else if lower.contains("invalid amount") {
        Some(ProviderErrorCode::InvalidAmount)
    } else if lower.contains("validation failed") {
        Some(ProviderErrorCode::ValidationFailed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("mtn_momo".parse::<Provider>().unwrap(), Provider::MtnMomo);
        assert_eq!("Airtel".parse::<Provider>().unwrap(), Provider::AirtelMoney);
        assert!("paypal".parse::<Provider>().is_err());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ProviderErrorCode::NetworkError).unwrap();
        assert_eq!(json, "\"NETWORK_ERROR\"");
        let code: ProviderErrorCode = serde_json::from_str("\"RATE_LIMITED\"").unwrap();
        assert_eq!(code, ProviderErrorCode::RateLimited);
    }

    #[test]
    fn test_structured_business_codes_are_rejections() {
        for code in [
            ProviderErrorCode::InvalidAccount,
            ProviderErrorCode::InsufficientFunds,
            ProviderErrorCode::AccountNotFound,
            ProviderErrorCode::InvalidAmount,
            ProviderErrorCode::ValidationFailed,
        ] {
            let err = ProviderError::new(code, "rejected");
            assert_eq!(classify_failure(&err), FailureKind::BusinessRejection);
        }
    }

    #[test]
    fn test_message_matching_catches_unstructured_rejections() {
        let err = ProviderError::new(
            ProviderErrorCode::TemporaryFailure,
            "Payment declined: Insufficient Funds",
        );
        assert_eq!(classify_failure(&err), FailureKind::BusinessRejection);

        let err = ProviderError::unknown("ACCOUNT_NOT_FOUND for payee");
        assert_eq!(classify_failure(&err), FailureKind::BusinessRejection);
    }

    #[test]
    fn test_transient_failures() {
        let err = ProviderError::network("connection reset by peer");
        assert_eq!(classify_failure(&err), FailureKind::Transient);
        let err = ProviderError::timeout("request timed out after 30s");
        assert_eq!(classify_failure(&err), FailureKind::Transient);
    }

    #[test]
    fn test_code_from_reason() {
        assert_eq!(
            code_from_reason("NOT_ENOUGH_FUNDS"),
            Some(ProviderErrorCode::InsufficientFunds)
        );
        assert_eq!(
            code_from_reason("PAYEE_NOT_FOUND"),
            Some(ProviderErrorCode::AccountNotFound)
        );
        assert_eq!(code_from_reason("INTERNAL_PROCESSING_ERROR"), None);
    }
}
