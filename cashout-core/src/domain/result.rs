//! Result and error types for the core library

use thiserror::Error;
use uuid::Uuid;

use super::cash_out::CashOutStatus;
use super::provider::ProviderError;

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A state-machine move that is not permitted from the current status.
    #[error("Invalid transition: cannot move cash-out from {from} to {to}")]
    InvalidTransition {
        from: CashOutStatus,
        to: CashOutStatus,
    },

    /// A conditional write lost against a concurrent writer.
    #[error("Version conflict on cash-out {id}: expected version {expected}")]
    VersionConflict { id: Uuid, expected: u64 },

    /// Insert rejected because the reference is already taken.
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_transition(from: CashOutStatus, to: CashOutStatus) -> Self {
        Self::InvalidTransition { from, to }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = Error::invalid_transition(CashOutStatus::Completed, CashOutStatus::Cancelled);
        assert_eq!(
            err.to_string(),
            "Invalid transition: cannot move cash-out from completed to cancelled"
        );
    }

    #[test]
    fn test_conflict_detection() {
        let err = Error::VersionConflict {
            id: Uuid::nil(),
            expected: 3,
        };
        assert!(err.is_conflict());
        assert!(!Error::not_found("x").is_conflict());
    }
}
