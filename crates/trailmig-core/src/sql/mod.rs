//! SQL rendering, schema introspection, and the statement journal.
//!
//! Every statement a migration issues goes through a [`Session`], which keeps
//! the exact text it ran. Values are rendered as quoted literals rather than
//! bound parameters so the journal can be replayed or reviewed as-is.

pub mod ddl;
pub mod definition;
pub mod introspect;
pub mod rebuild;

use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

pub use definition::TableDefinition;
pub use introspect::{ColumnInfo, ForeignKeyInfo, TableShape};
pub use rebuild::rebuild_table;

/// Quote an identifier (`"name"`, embedded quotes doubled).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal (`'text'`, embedded quotes doubled).
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render a JSON scalar as a SQL literal.
///
/// Returns `None` for arrays and objects.
pub fn json_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("NULL".to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(quote_literal(s)),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Comma separated list of quoted identifiers.
pub fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A connection wrapper that journals every statement it executes.
///
/// Reads go straight to [`Session::connection`] and are not journaled.
pub struct Session<'c> {
    conn: &'c Connection,
    statements: Vec<String>,
}

impl<'c> Session<'c> {
    /// Start a session with an empty journal.
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            statements: Vec::new(),
        }
    }

    /// Execute one statement, returning the number of changed rows.
    pub fn execute(&mut self, sql: impl Into<String>) -> rusqlite::Result<usize> {
        let sql = sql.into();
        debug!(sql = %sql, "execute");
        let changed = self.conn.execute(&sql, [])?;
        self.statements.push(sql);
        Ok(changed)
    }

    /// Execute a batch of statements verbatim.
    pub fn execute_batch(&mut self, sql: impl Into<String>) -> rusqlite::Result<()> {
        let sql = sql.into();
        debug!(sql = %sql, "execute batch");
        self.conn.execute_batch(&sql)?;
        self.statements.push(sql);
        Ok(())
    }

    /// Run a query returning a single integer.
    pub fn count(&self, sql: &str) -> rusqlite::Result<i64> {
        self.conn.query_row(sql, [], |row| row.get(0))
    }

    /// The underlying connection.
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Statements executed so far.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Number of statements executed so far.
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Consume the session, returning its journal.
    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }
}
