//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The engines
//! depend only on these traits, not on concrete implementations.

mod provider;
mod sink;
mod store;

pub use provider::{ProviderAdapter, ProviderRegistry};
pub use sink::{AuditLogger, EventPublisher};
pub use store::{CashOutFilter, CashOutStore};
