//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with state-machine and classification logic - no I/O.

pub mod cash_out;
pub mod event;
pub mod provider;
pub mod result;

pub use cash_out::{CashOutRecord, CashOutStatus, NewCashOut};
pub use event::{AuditEntry, AuditSeverity, AuditStatus, CashOutEvent, CashOutEventKind};
pub use provider::{
    classify_failure, FailureKind, Provider, ProviderError, ProviderErrorCode, ProviderResult,
    ProviderStatus, ProviderStatusReport,
};
