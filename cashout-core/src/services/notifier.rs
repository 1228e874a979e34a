//! Notifier - best-effort fan-out to the audit log and event publisher
//!
//! Sink failures are logged and swallowed. They never abort or roll back a
//! state transition that has already been persisted.

use std::sync::Arc;

use tracing::warn;

use crate::domain::{AuditEntry, CashOutEvent, CashOutRecord};
use crate::ports::{AuditLogger, EventPublisher};

#[derive(Clone)]
pub struct Notifier {
    audit: Arc<dyn AuditLogger>,
    events: Arc<dyn EventPublisher>,
}

impl Notifier {
    pub fn new(audit: Arc<dyn AuditLogger>, events: Arc<dyn EventPublisher>) -> Self {
        Self { audit, events }
    }

    pub async fn audit(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        let resource_id = entry.resource_id.clone();
        if let Err(e) = self.audit.log(entry).await {
            warn!(action = %action, resource_id = %resource_id, error = %e, "Failed to write audit entry");
        }
    }

    pub async fn publish(&self, event: &CashOutEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(
                event = event.name(),
                cash_out_id = %event.cash_out_id,
                error = %e,
                "Failed to publish event"
            );
        }
    }

    /// Publish the terminal event for `record`, if it has one
    pub async fn publish_terminal(&self, record: &CashOutRecord) {
        if let Some(event) = CashOutEvent::for_record(record) {
            self.publish(&event).await;
        }
    }
}
