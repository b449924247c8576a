use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use content_sync::{SkipReason, SyncReport, SyncStats};

use crate::schema;

/// One row of the journal, as shown by `content-agent status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub skip_reason: Option<SkipReason>,
    pub downloaded: u64,
    pub failed: u64,
    pub deleted: u64,
    pub message: String,
}

/// A SQLite journal of finished sync cycles.
///
/// The orchestrator writes one row per cycle and reads the aggregates back
/// at startup so that status survives a restart.
pub struct SyncHistory {
    conn: Mutex<rusqlite::Connection>,
}

impl SyncHistory {
    /// Open a journal backed by a file on disk, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(e.to_string()))?;
        }
        let conn =
            rusqlite::Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Open an in-memory journal (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self, StoreError> {
        let mut history = Self {
            conn: Mutex::new(conn),
        };
        history.migrate()?;
        Ok(history)
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        let conn = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        schema::migrations()
            .to_latest(conn)
            .map_err(|e| StoreError::Migration(e.to_string()))
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a finished cycle to the journal and fold it into the running
    /// totals in one transaction.
    pub fn record(&self, report: &SyncReport) -> Result<(), StoreError> {
        let failures_json = serde_json::to_string(&report.failures)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let mut delta = SyncStats::default();
        delta.absorb(report);

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO sync_runs
                (started_at, finished_at, success, skipped, skip_reason, downloaded, failed,
                 paused, resumed, deleted, delete_failures, failures_json, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                format_timestamp(&report.started_at),
                format_timestamp(&report.finished_at),
                report.success,
                report.skipped,
                report.skip_reason.map(|r| r.as_str()),
                to_sql_count(report.downloaded),
                to_sql_count(report.failed),
                to_sql_count(report.paused),
                to_sql_count(report.resumed),
                to_sql_count(report.deleted),
                to_sql_count(report.delete_failures),
                failures_json,
                report.message,
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.execute(
            "UPDATE sync_totals SET
                cycles = cycles + ?1,
                skipped_cycles = skipped_cycles + ?2,
                downloaded = downloaded + ?3,
                failed = failed + ?4,
                deleted = deleted + ?5,
                resumed = resumed + ?6
             WHERE id = 1",
            rusqlite::params![
                to_sql_count(delta.cycles),
                to_sql_count(delta.skipped_cycles),
                to_sql_count(delta.downloaded),
                to_sql_count(delta.failed),
                to_sql_count(delta.deleted),
                to_sql_count(delta.resumed),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit().map_err(|e| StoreError::Database(e.to_string()))
    }

    /// When the most recent cycle that actually ran finished.
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.latest_finished("skipped = 0")
    }

    /// When the most recent successful cycle finished.
    pub fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.latest_finished("success = 1")
    }

    fn latest_finished(&self, filter: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let sql =
            format!("SELECT finished_at FROM sync_runs WHERE {filter} ORDER BY id DESC LIMIT 1");
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match rows.next().map_err(|e| StoreError::Database(e.to_string()))? {
            Some(row) => {
                let raw: String = row.get(0).map_err(|e| StoreError::Database(e.to_string()))?;
                parse_timestamp(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Cumulative counters over every recorded cycle, including rows that
    /// have since been pruned.
    pub fn totals(&self) -> Result<SyncStats, StoreError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT cycles, skipped_cycles, downloaded, failed, deleted, resumed
             FROM sync_totals WHERE id = 1",
            [],
            |row| {
                Ok(SyncStats {
                    cycles: from_sql_count(row.get(0)?),
                    skipped_cycles: from_sql_count(row.get(1)?),
                    downloaded: from_sql_count(row.get(2)?),
                    failed: from_sql_count(row.get(3)?),
                    deleted: from_sql_count(row.get(4)?),
                    resumed: from_sql_count(row.get(5)?),
                })
            },
        )
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// The newest `limit` cycles, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT started_at, finished_at, success, skip_reason, downloaded, failed,
                        deleted, message
                 FROM sync_runs ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map([limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut runs = Vec::new();
        for row in rows {
            let (started, finished, success, skip_reason, downloaded, failed, deleted, message) =
                row.map_err(|e| StoreError::Database(e.to_string()))?;
            runs.push(SyncRun {
                started_at: parse_timestamp(&started)?,
                finished_at: parse_timestamp(&finished)?,
                success,
                skip_reason: skip_reason.as_deref().and_then(SkipReason::parse),
                downloaded: from_sql_count(downloaded),
                failed: from_sql_count(failed),
                deleted: from_sql_count(deleted),
                message,
            });
        }
        Ok(runs)
    }

    /// Drop all but the newest `keep` rows. Returns how many were removed.
    pub fn prune(&self, keep: usize) -> Result<usize, StoreError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        self.conn()
            .execute(
                "DELETE FROM sync_runs
                 WHERE id NOT IN (SELECT id FROM sync_runs ORDER BY id DESC LIMIT ?1)",
                [keep],
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

/// Errors specific to journal operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("bad timestamp {raw:?}: {e}")))
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_sql_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}
