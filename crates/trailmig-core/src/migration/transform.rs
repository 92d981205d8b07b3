//! Data transformations run inside migration scripts.
//!
//! Code renumbering never moves a value directly onto another live value:
//! every code is first parked on a scratch value that no row holds, so
//! swaps and cycles cannot collide with uniqueness constraints or with each
//! other. Each step touches every listed column before the next step starts.

use super::operation::{CodeMapping, ColumnMapping, ColumnRef};
use crate::sql::{quote_ident, Session};
use thiserror::Error;
use tracing::debug;

/// Data transformation errors.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Rows already hold the scratch value before the transformation.
    #[error("scratch value {value} is already used by {rows} row(s) of {table}.{column}")]
    ScratchValueInUse {
        /// Table holding the value.
        table: String,
        /// Column holding the value.
        column: String,
        /// Scratch value.
        value: i64,
        /// Number of rows holding it.
        rows: i64,
    },

    /// Rows still hold a scratch value after the transformation.
    #[error("{rows} row(s) of {table}.{column} still hold scratch value {value}")]
    ScratchResidue {
        /// Table holding the value.
        table: String,
        /// Column holding the value.
        column: String,
        /// Scratch value.
        value: i64,
        /// Number of rows holding it.
        rows: i64,
    },
}

fn rows_with(session: &Session<'_>, column: &ColumnRef, value: i64) -> rusqlite::Result<i64> {
    session.count(&format!(
        "SELECT COUNT(*) FROM {} WHERE {} = {}",
        quote_ident(&column.table),
        quote_ident(&column.column),
        value
    ))
}

fn ensure_unused(session: &Session<'_>, columns: &[ColumnRef], value: i64) -> Result<(), TransformError> {
    for column in columns {
        let rows = rows_with(session, column, value)?;
        if rows > 0 {
            return Err(TransformError::ScratchValueInUse {
                table: column.table.clone(),
                column: column.column.clone(),
                value,
                rows,
            });
        }
    }
    Ok(())
}

fn ensure_no_residue(
    session: &Session<'_>,
    columns: &[ColumnRef],
    value: i64,
) -> Result<(), TransformError> {
    for column in columns {
        let rows = rows_with(session, column, value)?;
        if rows > 0 {
            return Err(TransformError::ScratchResidue {
                table: column.table.clone(),
                column: column.column.clone(),
                value,
                rows,
            });
        }
    }
    Ok(())
}

fn move_code(
    session: &mut Session<'_>,
    column: &ColumnRef,
    from: i64,
    to: i64,
) -> rusqlite::Result<usize> {
    session.execute(format!(
        "UPDATE {} SET {} = {} WHERE {} = {}",
        quote_ident(&column.table),
        quote_ident(&column.column),
        to,
        quote_ident(&column.column),
        from
    ))
}

/// Swap `first` and `second` in every listed column through `scratch`.
///
/// Returns the number of row updates performed.
pub fn swap_codes(
    session: &mut Session<'_>,
    columns: &[ColumnRef],
    first: i64,
    second: i64,
    scratch: i64,
) -> Result<usize, TransformError> {
    ensure_unused(session, columns, scratch)?;

    let mut updated = 0;
    for (from, to) in [(first, scratch), (second, first), (scratch, second)] {
        for column in columns {
            updated += move_code(session, column, from, to)?;
        }
    }

    ensure_no_residue(session, columns, scratch)?;
    debug!(first, second, scratch, updated, "swapped codes");
    Ok(updated)
}

/// Apply an injective renumbering to every listed column.
///
/// Phase one parks each `from` code on slot `scratch_base + i`; phase two
/// moves each slot to its `to` code.
pub fn remap_codes(
    session: &mut Session<'_>,
    columns: &[ColumnRef],
    mapping: &[CodeMapping],
    scratch_base: i64,
) -> Result<usize, TransformError> {
    let slots: Vec<i64> = (0..mapping.len() as i64).map(|i| scratch_base + i).collect();
    for slot in &slots {
        ensure_unused(session, columns, *slot)?;
    }

    let mut updated = 0;
    for (m, slot) in mapping.iter().zip(&slots) {
        for column in columns {
            updated += move_code(session, column, m.from, *slot)?;
        }
    }
    for (m, slot) in mapping.iter().zip(&slots) {
        for column in columns {
            updated += move_code(session, column, *slot, m.to)?;
        }
    }

    for slot in &slots {
        ensure_no_residue(session, columns, *slot)?;
    }
    debug!(codes = mapping.len(), updated, "remapped codes");
    Ok(updated)
}

/// Set `column` from a SQL expression, optionally on filtered rows only.
pub fn backfill(
    session: &mut Session<'_>,
    table: &str,
    column: &str,
    value: &str,
    filter: Option<&str>,
) -> Result<usize, TransformError> {
    let mut sql = format!(
        "UPDATE {} SET {} = {}",
        quote_ident(table),
        quote_ident(column),
        value
    );
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    Ok(session.execute(sql)?)
}

/// Copy rows between tables. Each mapping's `from` is a SQL expression over
/// the source row; `to` names the destination column.
pub fn copy_rows(
    session: &mut Session<'_>,
    from_table: &str,
    to_table: &str,
    columns: &[ColumnMapping],
    filter: Option<&str>,
) -> Result<usize, TransformError> {
    let targets: Vec<String> = columns.iter().map(|m| quote_ident(&m.to)).collect();
    let sources: Vec<&str> = columns.iter().map(|m| m.from.as_str()).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_ident(to_table),
        targets.join(", "),
        sources.join(", "),
        quote_ident(from_table)
    );
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    let copied = session.execute(sql)?;
    debug!(from = %from_table, to = %to_table, copied, "copied rows");
    Ok(copied)
}
