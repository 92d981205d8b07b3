//! Live schema introspection through SQLite's pragma table functions.

use rusqlite::{params, Connection, OptionalExtension};

/// One column as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type, empty when none was declared.
    pub sql_type: String,
    /// Whether the column is NOT NULL.
    pub not_null: bool,
    /// Default expression as written.
    pub default: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk: i64,
}

/// One foreign key as reported by `pragma_foreign_key_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns; empty when the key targets the primary key implicitly.
    pub references_columns: Vec<String>,
    /// `ON UPDATE` action.
    pub on_update: String,
    /// `ON DELETE` action.
    pub on_delete: String,
}

/// Everything needed to recreate a table under a new definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableShape {
    /// Table name.
    pub name: String,
    /// `CREATE TABLE` statement as stored in `sqlite_master`.
    pub sql: String,
    /// Columns in declaration order, generated columns excluded.
    pub columns: Vec<ColumnInfo>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKeyInfo>,
    /// `CREATE INDEX` statements of explicit indexes.
    pub indexes: Vec<String>,
    /// `CREATE TRIGGER` statements of triggers on the table.
    pub triggers: Vec<String>,
}

impl TableShape {
    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Check whether a table exists.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Columns of a table in declaration order. Empty when the table is missing.
pub fn columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let rows = stmt.query_map(params![table], |row| {
        Ok(ColumnInfo {
            name: row.get(0)?,
            sql_type: row.get(1)?,
            not_null: row.get(2)?,
            default: row.get(3)?,
            pk: row.get(4)?,
        })
    })?;
    rows.collect()
}

/// Foreign keys of a table, one entry per constraint.
pub fn foreign_keys(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ForeignKeyInfo>> {
    let mut stmt = conn.prepare(
        "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete \
         FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;
    let mut rows = stmt.query(params![table])?;

    let mut keys: Vec<(i64, ForeignKeyInfo)> = Vec::new();
    let mut implicit_target = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let from: String = row.get(2)?;
        let to: Option<String> = row.get(3)?;

        if keys.last().map(|(last, _)| *last) != Some(id) {
            keys.push((
                id,
                ForeignKeyInfo {
                    columns: Vec::new(),
                    references_table: row.get(1)?,
                    references_columns: Vec::new(),
                    on_update: row.get(4)?,
                    on_delete: row.get(5)?,
                },
            ));
            implicit_target.push(false);
        }
        if let (Some((_, key)), Some(implicit)) = (keys.last_mut(), implicit_target.last_mut()) {
            key.columns.push(from);
            match to {
                Some(to) => key.references_columns.push(to),
                None => *implicit = true,
            }
        }
    }

    Ok(keys
        .into_iter()
        .zip(implicit_target)
        .map(|((_, mut key), implicit)| {
            if implicit {
                key.references_columns.clear();
            }
            key
        })
        .collect())
}

/// High-water mark of an `AUTOINCREMENT` table, when one is recorded.
pub fn sequence_value(conn: &Connection, table: &str) -> rusqlite::Result<Option<i64>> {
    if !table_exists(conn, "sqlite_sequence")? {
        return Ok(None);
    }
    conn.query_row(
        "SELECT seq FROM sqlite_sequence WHERE name = ?1",
        params![table],
        |row| row.get(0),
    )
    .optional()
}

fn schema_sql(conn: &Connection, kind: &str, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master \
         WHERE type = ?1 AND tbl_name = ?2 AND sql IS NOT NULL ORDER BY name",
    )?;
    let rows = stmt.query_map(params![kind, table], |row| row.get(0))?;
    rows.collect()
}

/// Names of the triggers attached to a table.
pub fn trigger_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ?1 ORDER BY name",
    )?;
    let rows = stmt.query_map(params![table], |row| row.get(0))?;
    rows.collect()
}

/// Load the full shape of a table, or `None` when it does not exist.
pub fn load_shape(conn: &Connection, table: &str) -> rusqlite::Result<Option<TableShape>> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    let Some(sql) = sql else {
        return Ok(None);
    };
    Ok(Some(TableShape {
        name: table.to_string(),
        sql,
        columns: columns(conn, table)?,
        foreign_keys: foreign_keys(conn, table)?,
        indexes: schema_sql(conn, "index", table)?,
        triggers: schema_sql(conn, "trigger", table)?,
    }))
}
