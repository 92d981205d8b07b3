//! Persistent record of shadow-table generations.

use super::AuditError;
use crate::sql::{quote_ident, quote_literal, Session};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

/// A source column captured into a shadow table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedColumn {
    /// Column name in the shadow table.
    pub name: String,
    /// Current name of the column in the source table.
    pub source: String,
    /// Declared type copied from the source column.
    #[serde(default)]
    pub sql_type: String,
}

/// One shadow-table generation of an audited table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditShadowTable {
    /// Audited table (its current name).
    pub source_table: String,
    /// Generation number, starting at 1.
    pub generation: i64,
    /// Shadow table name.
    pub shadow_table: String,
    /// Captured columns in shadow-table order.
    pub columns: Vec<CapturedColumn>,
    /// Source column copied into `last_editor_id`.
    pub editor_column: Option<String>,
    /// Whether the capture triggers currently write to this generation.
    pub active: bool,
    /// Creation time (UTC, ISO 8601).
    pub created_at: String,
}

impl AuditShadowTable {
    /// Captured shadow column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Catalog table access.
#[derive(Debug, Clone)]
pub struct AuditCatalog {
    table: String,
}

const SELECT_COLUMNS: &str =
    "source_table, generation, shadow_table, columns, editor_column, active, created_at";

impl AuditCatalog {
    /// Catalog stored in the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Catalog table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the catalog table if missing.
    pub fn ensure_table(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                source_table TEXT NOT NULL,
                generation INTEGER NOT NULL,
                shadow_table TEXT NOT NULL UNIQUE,
                columns TEXT NOT NULL,
                editor_column TEXT,
                active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                PRIMARY KEY (source_table, generation)
            )",
            quote_ident(&self.table)
        ))
    }

    fn decode(row: &Row<'_>) -> rusqlite::Result<(AuditShadowTable, String)> {
        let columns: String = row.get(3)?;
        Ok((
            AuditShadowTable {
                source_table: row.get(0)?,
                generation: row.get(1)?,
                shadow_table: row.get(2)?,
                columns: Vec::new(),
                editor_column: row.get(4)?,
                active: row.get(5)?,
                created_at: row.get(6)?,
            },
            columns,
        ))
    }

    fn finish(raw: (AuditShadowTable, String)) -> Result<AuditShadowTable, AuditError> {
        let (mut shadow, columns) = raw;
        shadow.columns =
            serde_json::from_str(&columns).map_err(|e| AuditError::InvalidCatalog {
                table: shadow.source_table.clone(),
                reason: e.to_string(),
            })?;
        Ok(shadow)
    }

    fn encode(shadow: &AuditShadowTable) -> Result<(String, String), AuditError> {
        let columns =
            serde_json::to_string(&shadow.columns).map_err(|e| AuditError::InvalidCatalog {
                table: shadow.source_table.clone(),
                reason: e.to_string(),
            })?;
        let editor = shadow
            .editor_column
            .as_deref()
            .map(quote_literal)
            .unwrap_or_else(|| "NULL".to_string());
        Ok((quote_literal(&columns), editor))
    }

    /// Every generation of a source table, oldest first.
    pub fn generations(
        &self,
        conn: &Connection,
        source: &str,
    ) -> Result<Vec<AuditShadowTable>, AuditError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE source_table = ?1 ORDER BY generation",
            SELECT_COLUMNS,
            quote_ident(&self.table)
        ))?;
        let rows = stmt
            .query_map(params![source], Self::decode)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::finish).collect()
    }

    /// The generation the capture triggers write to, if any.
    pub fn active(
        &self,
        conn: &Connection,
        source: &str,
    ) -> Result<Option<AuditShadowTable>, AuditError> {
        Ok(self
            .generations(conn, source)?
            .into_iter()
            .rev()
            .find(|g| g.active))
    }

    /// Highest generation number recorded for a source, 0 when none.
    pub fn latest_generation(&self, conn: &Connection, source: &str) -> rusqlite::Result<i64> {
        conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(generation), 0) FROM {} WHERE source_table = ?1",
                quote_ident(&self.table)
            ),
            params![source],
            |row| row.get(0),
        )
    }

    /// Record a new generation.
    pub fn insert(
        &self,
        session: &mut Session<'_>,
        shadow: &AuditShadowTable,
    ) -> Result<(), AuditError> {
        let (columns, editor) = Self::encode(shadow)?;

        session.execute(format!(
            "INSERT INTO {} ({}) VALUES ({}, {}, {}, {}, {}, {}, {})",
            quote_ident(&self.table),
            SELECT_COLUMNS,
            quote_literal(&shadow.source_table),
            shadow.generation,
            quote_literal(&shadow.shadow_table),
            columns,
            editor,
            i64::from(shadow.active),
            quote_literal(&shadow.created_at)
        ))?;
        Ok(())
    }

    /// Mark a generation active or inactive.
    pub fn set_active(
        &self,
        session: &mut Session<'_>,
        source: &str,
        generation: i64,
        active: bool,
    ) -> Result<(), AuditError> {
        session.execute(format!(
            "UPDATE {} SET active = {} WHERE source_table = {} AND generation = {}",
            quote_ident(&self.table),
            i64::from(active),
            quote_literal(source),
            generation
        ))?;
        Ok(())
    }

    /// Replace the captured column list of a generation.
    pub fn set_columns(
        &self,
        session: &mut Session<'_>,
        shadow: &AuditShadowTable,
    ) -> Result<(), AuditError> {
        let (columns, editor) = Self::encode(shadow)?;
        session.execute(format!(
            "UPDATE {} SET columns = {}, editor_column = {} \
             WHERE source_table = {} AND generation = {}",
            quote_ident(&self.table),
            columns,
            editor,
            quote_literal(&shadow.source_table),
            shadow.generation
        ))?;
        Ok(())
    }

    /// Remove a generation's record.
    pub fn delete(
        &self,
        session: &mut Session<'_>,
        source: &str,
        generation: i64,
    ) -> Result<(), AuditError> {
        session.execute(format!(
            "DELETE FROM {} WHERE source_table = {} AND generation = {}",
            quote_ident(&self.table),
            quote_literal(source),
            generation
        ))?;
        Ok(())
    }

    /// Move every generation of `from` to the source name `to`.
    pub fn rename_source(
        &self,
        session: &mut Session<'_>,
        from: &str,
        to: &str,
    ) -> Result<usize, AuditError> {
        Ok(session.execute(format!(
            "UPDATE {} SET source_table = {} WHERE source_table = {}",
            quote_ident(&self.table),
            quote_literal(to),
            quote_literal(from)
        ))?)
    }

    /// Deactivate every generation of a source.
    pub fn deactivate_source(
        &self,
        session: &mut Session<'_>,
        source: &str,
    ) -> Result<usize, AuditError> {
        Ok(session.execute(format!(
            "UPDATE {} SET active = 0 WHERE source_table = {} AND active = 1",
            quote_ident(&self.table),
            quote_literal(source)
        ))?)
    }
}
