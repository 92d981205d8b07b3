//! Version ledger persistence and prefix verification.
//!
//! The ledger is a table with one row per applied unit. Rows are appended in
//! the same transaction as the unit's forward script and removed in the same
//! transaction as its backward script, so the ledger never disagrees with the
//! schema it describes.

use super::error::{LedgerViolation, MigrationError};
use super::id::MigrationId;
use super::unit::{MigrationSet, MigrationUnit};
use crate::sql::{quote_ident, quote_literal, Session};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::Serialize;

/// One applied unit as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Applied unit id, as stored.
    pub migration_id: String,
    /// Unit name at apply time.
    pub name: String,
    /// Unit checksum at apply time.
    pub checksum: Option<String>,
    /// When the unit was applied.
    pub applied_at: DateTime<Utc>,
}

/// Ledger table access.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    /// Ledger stored in the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Ledger table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if missing.
    pub fn ensure_table(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                migration_id TEXT PRIMARY KEY NOT NULL,
                applied_at TIMESTAMP NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                checksum TEXT
            )",
            quote_ident(&self.table)
        ))
    }

    /// All entries in id order.
    pub fn entries(&self, conn: &Connection) -> Result<Vec<LedgerEntry>, MigrationError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT migration_id, name, checksum, applied_at FROM {} \
             ORDER BY length(migration_id), migration_id",
            quote_ident(&self.table)
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(LedgerEntry {
                migration_id: row.get(0)?,
                name: row.get(1)?,
                checksum: row.get(2)?,
                applied_at: row.get(3)?,
            })
        })?;
        let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Record `unit` as applied.
    pub fn append(
        &self,
        session: &mut Session<'_>,
        unit: &MigrationUnit,
        applied_at: DateTime<Utc>,
    ) -> Result<LedgerEntry, MigrationError> {
        let checksum = unit.checksum()?;
        session.execute(format!(
            "INSERT INTO {} (migration_id, applied_at, name, checksum) VALUES ({}, {}, {}, {})",
            quote_ident(&self.table),
            quote_literal(unit.id.as_str()),
            quote_literal(&applied_at.to_rfc3339_opts(SecondsFormat::Millis, false)),
            quote_literal(&unit.name),
            quote_literal(&checksum)
        ))?;
        Ok(LedgerEntry {
            migration_id: unit.id.to_string(),
            name: unit.name.clone(),
            checksum: Some(checksum),
            applied_at,
        })
    }

    /// Remove the entry for `id`. Exactly one row must be removed.
    pub fn remove(&self, session: &mut Session<'_>, id: &MigrationId) -> Result<(), MigrationError> {
        let removed = session.execute(format!(
            "DELETE FROM {} WHERE migration_id = {}",
            quote_ident(&self.table),
            quote_literal(id.as_str())
        ))?;
        if removed != 1 {
            return Err(MigrationError::StateCorrupted {
                message: format!("expected one ledger entry for {}, removed {}", id, removed),
            });
        }
        Ok(())
    }
}

/// Check that the ledger is a prefix of the known sequence.
///
/// Returns the number of applied units. Every recorded id must be known and
/// the recorded ids must be exactly the first *k* known ids. With
/// `verify_checksums`, every recorded checksum must match its unit.
pub fn verify_ledger(
    entries: &[LedgerEntry],
    migrations: &MigrationSet,
    verify_checksums: bool,
) -> Result<usize, MigrationError> {
    let mut applied = Vec::with_capacity(entries.len());
    for entry in entries {
        let unit = MigrationId::new(entry.migration_id.as_str())
            .ok()
            .and_then(|id| migrations.get(&id))
            .ok_or_else(|| LedgerViolation::UnknownMigration {
                migration_id: entry.migration_id.clone(),
            })?;
        applied.push((unit, entry));
    }
    applied.sort_by(|a, b| a.0.id.cmp(&b.0.id));

    let known = migrations.units();
    for (position, (unit, entry)) in applied.iter().enumerate() {
        let expected = &known[position];
        if expected.id != unit.id {
            return Err(LedgerViolation::Gap {
                missing: expected.id.clone(),
                applied: unit.id.clone(),
            }
            .into());
        }
        if !verify_checksums {
            continue;
        }
        if let Some(recorded) = &entry.checksum {
            let current = unit.checksum()?;
            if *recorded != current {
                return Err(MigrationError::ChecksumMismatch {
                    migration_id: unit.id.clone(),
                    recorded: recorded.clone(),
                    expected: current,
                });
            }
        }
    }

    Ok(applied.len())
}
