//! Table rebuild for changes `ALTER TABLE` cannot express.
//!
//! SQLite has no `ALTER TABLE .. ADD/DROP CONSTRAINT`. Foreign key changes are
//! applied by editing the stored `CREATE TABLE` text, creating the result under
//! a scratch name, copying the rows, dropping the old table, and renaming the
//! copy into place. Explicit indexes, triggers (audit capture triggers
//! included) and the `AUTOINCREMENT` high-water mark are restored afterwards.
//! Runs inside the caller's transaction with foreign key enforcement off.

use super::definition::TableDefinition;
use super::introspect::{load_shape, sequence_value, TableShape};
use super::{column_list, quote_ident, quote_literal, Session};
use crate::config::ENGINE_TABLE_PREFIX;
use crate::migration::error::OperationError;
use tracing::debug;

/// Rebuild `table` after applying `edit` to its stored definition.
pub fn rebuild_table<F>(session: &mut Session<'_>, table: &str, edit: F) -> Result<(), OperationError>
where
    F: FnOnce(&TableShape, &mut TableDefinition) -> Result<(), OperationError>,
{
    let shape = load_shape(session.connection(), table)?.ok_or_else(|| {
        OperationError::TableNotFound {
            table: table.to_string(),
        }
    })?;
    let mut definition =
        TableDefinition::parse(&shape.sql).ok_or_else(|| OperationError::UnsupportedDefinition {
            table: table.to_string(),
            reason: "stored CREATE TABLE statement could not be parsed".to_string(),
        })?;
    edit(&shape, &mut definition)?;

    let scratch = format!("{}rebuild_{}", ENGINE_TABLE_PREFIX, table);
    let columns = column_list(&shape.column_names());
    let sequence = sequence_value(session.connection(), table)?;
    debug!(table = %table, scratch = %scratch, "rebuilding table");

    session.execute(definition.create_sql(&scratch))?;
    session.execute(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_ident(&scratch),
        columns,
        columns,
        quote_ident(table)
    ))?;
    session.execute(format!("DROP TABLE {}", quote_ident(table)))?;
    rename_in_place(session, &scratch, table)?;

    if let Some(seq) = sequence {
        let name = quote_literal(table);
        session.execute(format!("DELETE FROM sqlite_sequence WHERE name = {}", name))?;
        session.execute(format!(
            "INSERT INTO sqlite_sequence (name, seq) VALUES ({}, {})",
            name, seq
        ))?;
    }

    for sql in shape.indexes.iter().chain(shape.triggers.iter()) {
        session.execute_batch(sql.as_str())?;
    }
    Ok(())
}

// Legacy rename keeps references elsewhere in the schema pointing at the
// original name. The pragma is switched back off whether or not it succeeds.
fn rename_in_place(session: &mut Session<'_>, from: &str, to: &str) -> Result<(), OperationError> {
    session.execute_batch("PRAGMA legacy_alter_table = ON")?;
    let renamed = session.execute(format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(from),
        quote_ident(to)
    ));
    session.execute_batch("PRAGMA legacy_alter_table = OFF")?;
    renamed?;
    Ok(())
}
