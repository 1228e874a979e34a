//! Adapter implementations (hexagonal architecture)
//!
//! Adapters are concrete implementations of the port interfaces.

pub mod airtel_money;
pub mod audit_log;
pub mod channel;
pub mod duckdb;
pub mod http;
pub mod mtn_momo;
pub mod sandbox;

pub use airtel_money::AirtelMoneyProvider;
pub use audit_log::{AuditRecord, DuckDbAuditLog};
pub use channel::ChannelEventPublisher;
pub use self::duckdb::DuckDbCashOutStore;
pub use mtn_momo::MtnMomoProvider;
pub use sandbox::SandboxProvider;
