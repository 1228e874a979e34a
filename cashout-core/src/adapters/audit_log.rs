//! Audit trail stored in DuckDB
//!
//! Entries go to `audit.duckdb` in the data directory, separate from the
//! record store so the trail can be kept, exported or pruned on its own.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::audit_migrations::AUDIT_MIGRATIONS;
use crate::domain::result::{Error, Result};
use crate::domain::AuditEntry;
use crate::ports::AuditLogger;
use crate::services::MigrationService;

pub const AUDIT_DB_FILE: &str = "audit.duckdb";

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique ID based on timestamp + counter
fn generate_id(timestamp_ms: i64) -> u64 {
    // Lower 16 bits carry the counter (65536 unique IDs per millisecond)
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    ((timestamp_ms as u64) << 16) | counter
}

/// An audit entry as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    /// Unix time in milliseconds
    pub timestamp: i64,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub status: String,
    pub severity: String,
}

/// DuckDB-backed audit logger
pub struct DuckDbAuditLog {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbAuditLog {
    /// Open or create `audit.duckdb` in `data_dir` and run pending migrations
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join(AUDIT_DB_FILE);
        let conn = Connection::open(&db_path)?;
        let log = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        log.run_migrations()?;
        Ok(log)
    }

    pub fn open_in_memory() -> Result<Self> {
        let log = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        log.run_migrations()?;
        Ok(log)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        MigrationService::new(&conn, AUDIT_MIGRATIONS).run_pending()?;
        Ok(())
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.lock()?;
        let timestamp = Utc::now().timestamp_millis();
        conn.execute(
            r#"
            INSERT INTO sys_audit_log (
                id, timestamp, action, resource_type, resource_id,
                description, metadata, status, severity
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            duckdb::params![
                generate_id(timestamp),
                timestamp,
                &entry.action,
                &entry.resource_type,
                &entry.resource_id,
                &entry.description,
                serde_json::to_string(&entry.metadata)?,
                entry.status.as_str(),
                entry.severity.as_str(),
            ],
        )?;
        Ok(())
    }

    fn query(&self, sql: &str, params: &[&dyn duckdb::ToSql]) -> Result<Vec<AuditRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, timestamp, action, resource_type, resource_id, description, metadata, status, severity)| {
                    let metadata = match metadata {
                        Some(text) => serde_json::from_str(&text)?,
                        None => serde_json::Value::Null,
                    };
                    Ok(AuditRecord {
                        id,
                        timestamp,
                        action,
                        resource_type,
                        resource_id,
                        description,
                        metadata,
                        status,
                        severity,
                    })
                },
            )
            .collect()
    }

    /// Most recent entries first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        self.query(
            r#"
            SELECT id, timestamp, action, resource_type, resource_id,
                   description, metadata, status, severity
            FROM sys_audit_log
            ORDER BY id DESC
            LIMIT ?
            "#,
            &[&(limit as i64)],
        )
    }

    /// Entries about one resource, most recent first
    pub fn get_for_resource(&self, resource_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        self.query(
            r#"
            SELECT id, timestamp, action, resource_type, resource_id,
                   description, metadata, status, severity
            FROM sys_audit_log
            WHERE resource_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
            &[&resource_id, &(limit as i64)],
        )
    }

    /// Get the total number of audit entries
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_audit_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Path of the audit database, `None` when in memory
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

#[async_trait]
impl AuditLogger for DuckDbAuditLog {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        self.append(&entry)
    }
}
