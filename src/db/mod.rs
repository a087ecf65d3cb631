//! SQLite-backed Store (spec §4.1).
//!
//! A single `Store` owns one `rusqlite::Connection`: all mutations
//! serialize through it (spec §5 single-writer model). Every mutation
//! commits in one transaction; on commit `sync_status` becomes `pending`
//! and `updated_at_utc` is stamped from `Clock::now_utc()`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Connection;

use crate::error::CoreError;

pub mod migrations;

pub mod bets;
pub mod board;
pub mod briefs;
pub mod daily_entries;
pub mod evidence;
pub mod overwrite_log;
pub mod portfolio;
pub mod preferences;
pub mod problems;
pub mod sessions;
pub mod sync_rows;
pub mod triggers;
pub mod watch;

static DEV_DB_MODE: AtomicBool = AtomicBool::new(false);

/// Switch `Store::open()` between the live and an isolated dev database
/// file, so tests and `--dev` runs never touch a user's real journal.
pub fn set_dev_db_mode(enabled: bool) {
    DEV_DB_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_dev_db_mode() -> bool {
    DEV_DB_MODE.load(Ordering::Relaxed)
}

/// Failure modes specific to the Store (spec §4.1), converted into
/// `CoreError` at the public boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("conflicting version: expected {expected}, found {found}")]
    ConflictingVersion { expected: i64, found: i64 },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => CoreError::NotFound(id),
            StoreError::ConstraintViolation(msg) => CoreError::ConstraintViolation(msg),
            StoreError::ConflictingVersion { found, .. } => CoreError::ConflictingVersion(found),
            StoreError::Sqlite(e) => CoreError::IntegrityCorrupted(e.to_string()),
        }
    }
}

pub(crate) fn parse_sync_status(s: &str) -> crate::types::SyncStatus {
    use crate::types::SyncStatus;
    match s {
        "synced" => SyncStatus::Synced,
        "conflict" => SyncStatus::Conflict,
        _ => SyncStatus::Pending,
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a SQLite transaction: commits on `Ok`, rolls back
    /// on `Err`. Every mutation helper on `Store` goes through this.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&self.conn) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    fn db_path() -> Result<PathBuf, StoreError> {
        let dir = crate::config::state_dir()
            .map_err(|e| StoreError::ConstraintViolation(format!("no home directory: {e}")))?;
        let name = if is_dev_db_mode() {
            "journal-dev.db"
        } else {
            "journal.db"
        };
        Ok(dir.join(name))
    }

    pub fn open() -> Result<Self, StoreError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    pub fn open_at(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::ConstraintViolation(format!("cannot create state dir: {e}")))?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_migrations(&conn).map_err(StoreError::ConstraintViolation)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn).map_err(StoreError::ConstraintViolation)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Physically remove rows soft-deleted more than 30 days ago, across
    /// every entity table (spec §3 lifecycle, §6 retention).
    pub fn purge_expired_soft_deletes(&self, now: chrono::DateTime<chrono::Utc>) -> Result<usize, StoreError> {
        const TABLES: &[&str] = &[
            "daily_entries",
            "weekly_briefs",
            "problems",
            "portfolio_health",
            "portfolio_versions",
            "board_members",
            "governance_sessions",
            "bets",
            "evidence_items",
            "resetup_triggers",
            "user_preferences",
        ];
        let cutoff = (now - chrono::Duration::days(30)).to_rfc3339();
        let mut purged = 0usize;
        self.with_transaction(|conn| {
            for table in TABLES {
                let sql = format!("DELETE FROM {table} WHERE deleted_at_utc IS NOT NULL AND deleted_at_utc <= ?1");
                purged += conn.execute(&sql, rusqlite::params![cutoff])?;
            }
            Ok(())
        })?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_applies_schema() {
        let store = Store::open_in_memory().unwrap();
        let count: i64 = store
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
