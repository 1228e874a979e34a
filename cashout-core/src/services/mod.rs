//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

mod cash_out;
pub mod migration;
mod notifier;
mod reconciliation;
mod retry;
mod scheduler;

pub use cash_out::{CashOutService, StatusSummary};
pub use migration::{MigrationResult, MigrationService};
pub use notifier::Notifier;
pub use reconciliation::{
    ProviderReconciliation, ReconcileAction, ReconcileDetail, ReconcileOptions,
    ReconciliationEngine, ReconciliationReport, ReconciliationResult, ReportOptions,
    ReportTotals, StatusTotals,
};
pub use retry::{
    Attempt, RetryEngine, RetryOutcome, RetryPolicy, RetrySweepResult, ScheduledRetry,
    SkipReason, PROVIDER_REPORTED_FAILURE,
};
pub use scheduler::{SchedulerConfig, Supervisor};
