//! Event and audit sink ports
//!
//! Both sinks are fire-and-forget from the engines' point of view: a failing
//! sink is logged and never blocks a state transition.

use async_trait::async_trait;

use crate::domain::result::Result;
use crate::domain::{AuditEntry, CashOutEvent};

/// Append-only audit trail
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, entry: AuditEntry) -> Result<()>;
}

/// Domain event publisher (at-least-once toward its consumers)
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &CashOutEvent) -> Result<()>;
}
