//! DuckDB record store implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::{params, Connection};
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{CashOutRecord, CashOutStatus, Provider};
use crate::migrations::MIGRATIONS;
use crate::ports::{CashOutFilter, CashOutStore};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const SELECT_COLUMNS: &str = "id, user_id, wallet_id, amount, currency, fee, provider,
    provider_account_id, provider_account_name, provider_transaction_id, reference, status,
    provider_response, failure_reason, retry_count, last_retry_at, next_retry_at,
    completed_at, created_at, updated_at, version";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Raw column values as read from a row, converted after the statement is done
struct RawRecord {
    id: String,
    user_id: String,
    wallet_id: String,
    amount: String,
    currency: String,
    fee: String,
    provider: String,
    provider_account_id: String,
    provider_account_name: Option<String>,
    provider_transaction_id: Option<String>,
    reference: String,
    status: String,
    provider_response: Option<String>,
    failure_reason: Option<String>,
    retry_count: i64,
    last_retry_at: Option<String>,
    next_retry_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl RawRecord {
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            wallet_id: row.get(2)?,
            amount: row.get(3)?,
            currency: row.get(4)?,
            fee: row.get(5)?,
            provider: row.get(6)?,
            provider_account_id: row.get(7)?,
            provider_account_name: row.get(8)?,
            provider_transaction_id: row.get(9)?,
            reference: row.get(10)?,
            status: row.get(11)?,
            provider_response: row.get(12)?,
            failure_reason: row.get(13)?,
            retry_count: row.get(14)?,
            last_retry_at: row.get(15)?,
            next_retry_at: row.get(16)?,
            completed_at: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
            version: row.get(20)?,
        })
    }

    fn into_record(self) -> Result<CashOutRecord> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::database(format!("Corrupt cash-out id '{}': {}", self.id, e)))?;
        let provider_response = self
            .provider_response
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(CashOutRecord {
            id,
            user_id: self.user_id,
            wallet_id: self.wallet_id,
            amount: parse_decimal(&self.amount)?,
            currency: self.currency,
            fee: parse_decimal(&self.fee)?,
            provider: Provider::from_str(&self.provider).map_err(Error::database)?,
            provider_account_id: self.provider_account_id,
            provider_account_name: self.provider_account_name,
            provider_transaction_id: self.provider_transaction_id,
            reference: self.reference,
            status: CashOutStatus::from_str(&self.status).map_err(Error::database)?,
            provider_response,
            failure_reason: self.failure_reason,
            retry_count: u32::try_from(self.retry_count)
                .map_err(|_| Error::database(format!("Corrupt retry_count {}", self.retry_count)))?,
            last_retry_at: parse_optional_timestamp(self.last_retry_at.as_deref())?,
            next_retry_at: parse_optional_timestamp(self.next_retry_at.as_deref())?,
            completed_at: parse_optional_timestamp(self.completed_at.as_deref())?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            version: u64::try_from(self.version)
                .map_err(|_| Error::database(format!("Corrupt version {}", self.version)))?,
        })
    }
}

/// DuckDB-backed cash-out record store
pub struct DuckDbCashOutStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbCashOutStore {
    /// Open (or create) the store at `db_path`.
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when another process (a CLI invocation next to a running
    /// supervisor) holds the file.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max_attempts = MAX_RETRIES,
                            error = %err_msg,
                            "Database busy, retrying"
                        );
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// In-memory store with the schema applied
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; JSON is statically linked via the "json" feature
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn, MIGRATIONS).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
    ) -> Result<Vec<CashOutRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, RawRecord::from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        raw.into_iter().map(RawRecord::into_record).collect()
    }

    fn current_version(conn: &Connection, id: Uuid) -> Result<Option<u64>> {
        let mut stmt = conn.prepare("SELECT version FROM sys_cash_outs WHERE id = ?")?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let version: i64 = row.get(0)?;
                Ok(Some(version as u64))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CashOutStore for DuckDbCashOutStore {
    async fn create(&self, record: &CashOutRecord) -> Result<()> {
        let conn = self.lock()?;

        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sys_cash_outs WHERE reference = ?",
            [&record.reference],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(Error::DuplicateReference(record.reference.clone()));
        }

        let provider_response = record
            .provider_response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO sys_cash_outs (
                id, user_id, wallet_id, amount, currency, fee, provider,
                provider_account_id, provider_account_name, provider_transaction_id,
                reference, status, provider_response, failure_reason, retry_count,
                last_retry_at, next_retry_at, completed_at, created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id.to_string(),
                &record.user_id,
                &record.wallet_id,
                record.amount.to_string(),
                &record.currency,
                record.fee.to_string(),
                record.provider.as_str(),
                &record.provider_account_id,
                &record.provider_account_name,
                &record.provider_transaction_id,
                &record.reference,
                record.status.as_str(),
                provider_response,
                &record.failure_reason,
                record.retry_count as i64,
                record.last_retry_at.map(format_timestamp),
                record.next_retry_at.map(format_timestamp),
                record.completed_at.map(format_timestamp),
                format_timestamp(record.created_at),
                format_timestamp(record.updated_at),
                record.version as i64,
            ],
        )?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CashOutRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM sys_cash_outs WHERE id = ?", SELECT_COLUMNS);
        let id = id.to_string();
        Ok(Self::query_records(&conn, &sql, &[&id])?.into_iter().next())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<CashOutRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM sys_cash_outs WHERE reference = ?", SELECT_COLUMNS);
        Ok(Self::query_records(&conn, &sql, &[&reference])?.into_iter().next())
    }

    async fn find(&self, filter: &CashOutFilter, limit: Option<usize>) -> Result<Vec<CashOutRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn duckdb::ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            clauses.push(format!("status IN ({})", placeholders));
            for status in &filter.statuses {
                values.push(Box::new(status.as_str().to_string()));
            }
        }
        if let Some(provider) = filter.provider {
            clauses.push("provider = ?".to_string());
            values.push(Box::new(provider.as_str().to_string()));
        }
        if let Some(from) = filter.created_from {
            clauses.push("created_at >= ?".to_string());
            values.push(Box::new(format_timestamp(from)));
        }
        if let Some(to) = filter.created_to {
            clauses.push("created_at < ?".to_string());
            values.push(Box::new(format_timestamp(to)));
        }
        if let Some(due_by) = filter.next_retry_due_by {
            clauses.push("next_retry_at IS NOT NULL AND next_retry_at <= ?".to_string());
            values.push(Box::new(format_timestamp(due_by)));
        }
        if let Some(min) = filter.min_retry_count {
            clauses.push("retry_count >= ?".to_string());
            values.push(Box::new(min as i64));
        }
        if let Some(max) = filter.max_retry_count {
            clauses.push("retry_count <= ?".to_string());
            values.push(Box::new(max as i64));
        }
        match filter.acknowledged {
            Some(true) => clauses.push("provider_transaction_id IS NOT NULL".to_string()),
            Some(false) => clauses.push("provider_transaction_id IS NULL".to_string()),
            None => {}
        }

        let mut sql = format!("SELECT {} FROM sys_cash_outs", SELECT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let param_refs: Vec<&dyn duckdb::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let conn = self.lock()?;
        Self::query_records(&conn, &sql, &param_refs)
    }

    async fn save(&self, record: &CashOutRecord, expected_version: Option<u64>) -> Result<CashOutRecord> {
        let conn = self.lock()?;

        let current = Self::current_version(&conn, record.id)?
            .ok_or_else(|| Error::not_found(format!("Cash-out {} not found", record.id)))?;
        let expected = expected_version.unwrap_or(current);
        if current != expected {
            return Err(Error::VersionConflict {
                id: record.id,
                expected,
            });
        }

        let mut saved = record.clone();
        saved.version = expected + 1;
        saved.updated_at = Utc::now();

        let provider_response = saved
            .provider_response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let updated = conn.execute(
            "UPDATE sys_cash_outs SET
                provider_transaction_id = ?,
                status = ?,
                provider_response = ?,
                failure_reason = ?,
                retry_count = ?,
                last_retry_at = ?,
                next_retry_at = ?,
                completed_at = ?,
                updated_at = ?,
                version = ?
             WHERE id = ? AND version = ?",
            params![
                &saved.provider_transaction_id,
                saved.status.as_str(),
                provider_response,
                &saved.failure_reason,
                saved.retry_count as i64,
                saved.last_retry_at.map(format_timestamp),
                saved.next_retry_at.map(format_timestamp),
                saved.completed_at.map(format_timestamp),
                format_timestamp(saved.updated_at),
                saved.version as i64,
                saved.id.to_string(),
                expected as i64,
            ],
        )?;

        // Another process sharing the file can still win between the read and the write
        if updated == 0 {
            return Err(Error::VersionConflict {
                id: record.id,
                expected,
            });
        }

        Ok(saved)
    }

    async fn count_by_status(&self) -> Result<Vec<(CashOutStatus, u64)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM sys_cash_outs GROUP BY status ORDER BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let mut counts = Vec::with_capacity(rows.len());
        for (status, count) in rows {
            let status = CashOutStatus::from_str(&status).map_err(Error::database)?;
            counts.push((status, count as u64));
        }
        counts.sort_by_key(|(status, _)| *status);
        Ok(counts)
    }
}

// Helper functions

/// Fixed-width UTC timestamp, so string order equals time order
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::database(format!("Corrupt timestamp '{}': {}", s, e)))
}

fn parse_optional_timestamp(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_timestamp).transpose()
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| Error::database(format!("Corrupt amount '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, SubsecRound};
    use tempfile::tempdir;

    use crate::domain::NewCashOut;

    fn record(provider: Provider) -> CashOutRecord {
        CashOutRecord::new(NewCashOut {
            user_id: "user-1".to_string(),
            wallet_id: "wallet-1".to_string(),
            amount: Decimal::new(150075, 2),
            currency: "UGX".to_string(),
            fee: Decimal::new(1250, 2),
            provider,
            provider_account_id: "256772000111".to_string(),
            provider_account_name: None,
        })
    }

    #[test]
    fn test_timestamp_format_is_sortable() {
        let early = Utc::now();
        let late = early + ChronoDuration::milliseconds(1);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert!(format_timestamp(early).ends_with('Z'));
        assert_eq!(parse_timestamp(&format_timestamp(early)).unwrap(), early.trunc_subsecs(6));
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = DuckDbCashOutStore::open_in_memory().unwrap();
        let mut rec = record(Provider::MtnMomo);
        rec.provider_response = Some(serde_json::json!({"status": "PENDING"}));
        store.create(&rec).await.unwrap();

        let found = store.find_by_id(rec.id).await.unwrap().unwrap();
        assert_eq!(found.reference, rec.reference);
        assert_eq!(found.amount, Decimal::new(150075, 2));
        assert_eq!(found.provider_response, rec.provider_response);
        assert_eq!(found.version, 1);

        let by_ref = store.find_by_reference(&rec.reference).await.unwrap().unwrap();
        assert_eq!(by_ref.id, rec.id);
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = DuckDbCashOutStore::open_in_memory().unwrap();
        let first = record(Provider::MtnMomo);
        store.create(&first).await.unwrap();

        let mut second = record(Provider::MtnMomo);
        second.reference = first.reference.clone();
        let err = store.create(&second).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateReference(_)));
    }

    #[tokio::test]
    async fn test_conditional_save() {
        let store = DuckDbCashOutStore::open_in_memory().unwrap();
        let mut rec = record(Provider::AirtelMoney);
        store.create(&rec).await.unwrap();

        rec.begin_processing(Utc::now()).unwrap();
        let saved = store.save(&rec, Some(1)).await.unwrap();
        assert_eq!(saved.version, 2);

        // A writer still holding version 1 loses
        let err = store.save(&rec, Some(1)).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.find_by_id(rec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CashOutStatus::Processing);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_save_missing_record_is_not_found() {
        let store = DuckDbCashOutStore::open_in_memory().unwrap();
        let rec = record(Provider::MtnMomo);
        let err = store.save(&rec, Some(1)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unconditional_save_bumps_version() {
        let store = DuckDbCashOutStore::open_in_memory().unwrap();
        let mut rec = record(Provider::MtnMomo);
        store.create(&rec).await.unwrap();
        rec.cancel(Utc::now()).unwrap();

        let saved = store.save(&rec, None).await.unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(saved.status, CashOutStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_find_with_filter() {
        let store = DuckDbCashOutStore::open_in_memory().unwrap();
        let now = Utc::now();

        let pending = record(Provider::MtnMomo);
        store.create(&pending).await.unwrap();

        let mut due = record(Provider::MtnMomo);
        due.schedule_retry(now - ChronoDuration::seconds(5), now).unwrap();
        store.create(&due).await.unwrap();

        let mut later = record(Provider::AirtelMoney);
        later.schedule_retry(now + ChronoDuration::hours(1), now).unwrap();
        store.create(&later).await.unwrap();

        let filter = CashOutFilter {
            statuses: vec![CashOutStatus::Processing],
            next_retry_due_by: Some(now),
            min_retry_count: Some(1),
            ..CashOutFilter::default()
        };
        let found = store.find(&filter, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);

        let airtel = CashOutFilter::default().provider(Some(Provider::AirtelMoney));
        assert_eq!(store.find(&airtel, None).await.unwrap().len(), 1);

        let mut acknowledged = record(Provider::MtnMomo);
        acknowledged.begin_processing(now).unwrap();
        acknowledged
            .record_acknowledgement("momo-tx-1", serde_json::json!({}), now)
            .unwrap();
        store.create(&acknowledged).await.unwrap();
        let with_tx = CashOutFilter {
            acknowledged: Some(true),
            ..CashOutFilter::default()
        };
        let found = store.find(&with_tx, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, acknowledged.id);
        let without_tx = CashOutFilter {
            acknowledged: Some(false),
            ..CashOutFilter::default()
        };
        assert_eq!(store.find(&without_tx, None).await.unwrap().len(), 3);

        let all = store.find(&CashOutFilter::default(), Some(2)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, pending.id);
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let store = DuckDbCashOutStore::open_in_memory().unwrap();
        store.create(&record(Provider::MtnMomo)).await.unwrap();
        store.create(&record(Provider::MtnMomo)).await.unwrap();
        let mut cancelled = record(Provider::AirtelMoney);
        cancelled.cancel(Utc::now()).unwrap();
        store.create(&cancelled).await.unwrap();

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(
            counts,
            vec![(CashOutStatus::Pending, 2), (CashOutStatus::Cancelled, 1)]
        );
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cashout.duckdb");
        let rec = record(Provider::MtnMomo);
        {
            let store = DuckDbCashOutStore::new(&path).unwrap();
            store.ensure_schema().unwrap();
            store.create(&rec).await.unwrap();
        }
        let store = DuckDbCashOutStore::new(&path).unwrap();
        store.ensure_schema().unwrap();
        assert!(store.find_by_id(rec.id).await.unwrap().is_some());
        assert_eq!(store.db_path(), Some(path.as_path()));
    }
}
