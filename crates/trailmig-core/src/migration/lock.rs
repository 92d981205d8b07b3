//! Ledger lock.
//!
//! A single-row table whose row exists while a runner owns the ledger. The
//! row is inserted in autocommit mode so every other connection sees it, and
//! removed when the [`LockGuard`] is released or dropped.

use super::error::MigrationError;
use crate::sql::quote_ident;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

/// The current holder of the ledger lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    /// Owner identity recorded at acquisition.
    pub owner: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

/// Table-based lock serialising runners on one database.
#[derive(Debug, Clone)]
pub struct LedgerLock {
    table: String,
    owner: String,
}

impl LedgerLock {
    /// Lock stored in `table`, taken under the identity `owner`.
    pub fn new(table: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            owner: owner.into(),
        }
    }

    /// Identity recorded while this lock is held.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Create the lock table if missing.
    pub fn ensure_table(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                acquired_at TIMESTAMP NOT NULL
            )",
            quote_ident(&self.table)
        ))
    }

    /// Take the lock.
    ///
    /// Fails with [`MigrationError::LockContention`] when another runner holds
    /// it or the database stays busy past the busy timeout.
    pub fn acquire<'c>(&self, conn: &'c Connection) -> Result<LockGuard<'c>, MigrationError> {
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} (id, owner, acquired_at) VALUES (1, ?1, ?2)",
                quote_ident(&self.table)
            ),
            params![self.owner, Utc::now()],
        );

        match inserted {
            Ok(_) => {
                debug!(owner = %self.owner, "ledger lock acquired");
                Ok(LockGuard {
                    conn,
                    table: self.table.clone(),
                    owner: self.owner.clone(),
                    released: false,
                })
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                let owner = self.holder(conn)?.map(|holder| holder.owner);
                Err(MigrationError::LockContention { owner })
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Err(MigrationError::LockContention { owner: None })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The current holder, if the lock is taken.
    pub fn holder(&self, conn: &Connection) -> Result<Option<LockHolder>, MigrationError> {
        let holder = conn
            .query_row(
                &format!(
                    "SELECT owner, acquired_at FROM {} WHERE id = 1",
                    quote_ident(&self.table)
                ),
                [],
                |row| {
                    Ok(LockHolder {
                        owner: row.get(0)?,
                        acquired_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(holder)
    }

    /// Clear the lock regardless of owner. Returns the previous holder.
    pub fn force_release(&self, conn: &Connection) -> Result<Option<LockHolder>, MigrationError> {
        let holder = self.holder(conn)?;
        conn.execute(&format!("DELETE FROM {}", quote_ident(&self.table)), [])?;
        if let Some(holder) = &holder {
            warn!(owner = %holder.owner, "ledger lock forcibly released");
        }
        Ok(holder)
    }
}

/// Held ledger lock; released on drop.
#[derive(Debug)]
pub struct LockGuard<'c> {
    conn: &'c Connection,
    table: String,
    owner: String,
    released: bool,
}

impl LockGuard<'_> {
    /// Owner identity recorded in the lock row.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release the lock, reporting failure.
    pub fn release(mut self) -> Result<(), MigrationError> {
        self.released = true;
        self.delete_row()?;
        Ok(())
    }

    fn delete_row(&self) -> rusqlite::Result<usize> {
        let removed = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE id = 1 AND owner = ?1",
                quote_ident(&self.table)
            ),
            params![self.owner],
        )?;
        debug!(owner = %self.owner, "ledger lock released");
        Ok(removed)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.delete_row() {
            warn!(owner = %self.owner, error = %e, "failed to release ledger lock");
        }
    }
}
