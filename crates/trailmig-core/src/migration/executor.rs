//! Schema executor - runs one script of one unit.
//!
//! Operations run strictly in listed order against the caller's transaction.
//! The first failure stops the script; the caller drops the transaction so
//! nothing of the unit survives.

use super::error::{MigrationError, OperationError};
use super::id::MigrationId;
use super::operation::Operation;
use super::transform;
use super::unit::{Direction, Script};
use crate::audit::AuditTrailGenerator;
use crate::sql::{ddl, quote_ident, rebuild_table, Session};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of one executed script.
#[derive(Debug, Clone, Default)]
pub struct ScriptSummary {
    /// Operations executed.
    pub operations: usize,
    /// SQL statements issued.
    pub statements: usize,
    /// Wall time spent.
    pub duration: Duration,
}

/// Runs scripts against an open transaction.
#[derive(Debug, Clone)]
pub struct SchemaExecutor {
    audit: AuditTrailGenerator,
    check_foreign_keys: bool,
}

impl SchemaExecutor {
    /// Create an executor.
    pub fn new(audit: AuditTrailGenerator, check_foreign_keys: bool) -> Self {
        Self {
            audit,
            check_foreign_keys,
        }
    }

    /// The audit trail generator used for audit operations.
    pub fn audit(&self) -> &AuditTrailGenerator {
        &self.audit
    }

    /// Execute `script` for `migration_id`.
    ///
    /// When foreign key checking is on, `PRAGMA foreign_key_check` runs after
    /// the last operation and any violation fails the unit.
    pub fn execute(
        &self,
        session: &mut Session<'_>,
        migration_id: &MigrationId,
        script: &Script,
        direction: Direction,
    ) -> Result<ScriptSummary, MigrationError> {
        let start = Instant::now();
        let first_statement = session.statement_count();

        for (index, operation) in script.iter().enumerate() {
            debug!(
                migration_id = %migration_id,
                %direction,
                index,
                operation = %operation.description(),
                "executing operation"
            );
            self.apply_operation(session, operation)
                .map_err(|source| MigrationError::OperationFailed {
                    migration_id: migration_id.clone(),
                    direction,
                    index,
                    operation: operation.description(),
                    source,
                })?;
        }

        if self.check_foreign_keys {
            let violations = foreign_key_violations(session)?;
            if !violations.is_empty() {
                warn!(
                    migration_id = %migration_id,
                    count = violations.len(),
                    "foreign key violations after script"
                );
                return Err(MigrationError::IntegrityCheckFailed {
                    migration_id: migration_id.clone(),
                    violations,
                });
            }
        }

        Ok(ScriptSummary {
            operations: script.len(),
            statements: session.statement_count() - first_statement,
            duration: start.elapsed(),
        })
    }

    /// Apply a single operation.
    pub fn apply_operation(
        &self,
        session: &mut Session<'_>,
        operation: &Operation,
    ) -> Result<(), OperationError> {
        match operation {
            Operation::CreateTable {
                table,
                columns,
                primary_key,
                foreign_keys,
            } => {
                session.execute(ddl::create_table(table, columns, primary_key, foreign_keys))?;
            }
            Operation::DropTable { table } => {
                session.execute(format!("DROP TABLE {}", quote_ident(table)))?;
                self.audit.table_dropped(session, table)?;
            }
            Operation::RenameTable { from, to } => {
                session.execute(format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote_ident(from),
                    quote_ident(to)
                ))?;
                self.audit.table_renamed(session, from, to)?;
            }
            Operation::AddColumn { table, column } => {
                session.execute(format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(table),
                    ddl::column_def(column)
                ))?;
            }
            Operation::DropColumn { table, column } => {
                session.execute(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    quote_ident(table),
                    quote_ident(column)
                ))?;
            }
            Operation::RenameColumn { table, from, to } => {
                session.execute(format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    quote_ident(table),
                    quote_ident(from),
                    quote_ident(to)
                ))?;
                self.audit.column_renamed(session, table, from, to)?;
            }
            Operation::AddForeignKey { table, foreign_key } => {
                let clause = ddl::foreign_key_clause(foreign_key);
                rebuild_table(session, table, |_, definition| {
                    definition.push_constraint(clause);
                    Ok(())
                })?;
            }
            Operation::DropForeignKey { table, columns } => {
                rebuild_table(session, table, |shape, definition| {
                    let declared = shape.foreign_keys.iter().any(|fk| fk.columns == *columns);
                    if declared && definition.drop_foreign_key(columns) {
                        Ok(())
                    } else {
                        Err(OperationError::ForeignKeyNotFound {
                            table: table.clone(),
                            columns: columns.join(", "),
                        })
                    }
                })?;
            }
            Operation::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                session.execute(ddl::create_index(name, table, columns, *unique))?;
            }
            Operation::DropIndex { name } => {
                session.execute(format!("DROP INDEX {}", quote_ident(name)))?;
            }
            Operation::InsertSeedRow { table, values } => {
                session.execute(ddl::insert_row(table, values)?)?;
            }
            Operation::DeleteSeedRow { table, key } => {
                if session.execute(ddl::delete_rows(table, key)?)? == 0 {
                    return Err(seed_row_missing(table, key)?);
                }
            }
            Operation::UpdateSeedRow { table, key, values } => {
                if session.execute(ddl::update_rows(table, key, values)?)? == 0 {
                    return Err(seed_row_missing(table, key)?);
                }
            }
            Operation::RawStatement { sql } => {
                session.execute_batch(sql.as_str())?;
            }
            Operation::SwapCodes {
                columns,
                first,
                second,
                scratch,
            } => {
                transform::swap_codes(session, columns, *first, *second, *scratch)?;
            }
            Operation::RemapCodes {
                columns,
                mapping,
                scratch_base,
            } => {
                transform::remap_codes(session, columns, mapping, *scratch_base)?;
            }
            Operation::Backfill {
                table,
                column,
                value,
                filter,
            } => {
                transform::backfill(session, table, column, value, filter.as_deref())?;
            }
            Operation::CopyRows {
                from_table,
                to_table,
                columns,
                filter,
            } => {
                transform::copy_rows(session, from_table, to_table, columns, filter.as_deref())?;
            }
            Operation::RegenerateAudit {
                table,
                columns,
                editor_column,
            } => {
                self.audit
                    .regenerate(session, table, columns, editor_column.as_deref())?;
            }
            Operation::RevertAudit { table } => {
                self.audit.revert(session, table)?;
            }
        }
        Ok(())
    }
}

fn seed_row_missing(
    table: &str,
    key: &super::operation::RowValues,
) -> Result<OperationError, OperationError> {
    Ok(OperationError::SeedRowMissing {
        table: table.to_string(),
        key: ddl::key_predicate(key)?,
    })
}

fn foreign_key_violations(session: &Session<'_>) -> rusqlite::Result<Vec<String>> {
    let mut stmt = session.connection().prepare("PRAGMA foreign_key_check")?;
    let rows = stmt.query_map([], |row| {
        let table: String = row.get(0)?;
        let rowid: Option<i64> = row.get(1)?;
        let parent: String = row.get(2)?;
        Ok(match rowid {
            Some(rowid) => format!("{} row {} references missing {}", table, rowid, parent),
            None => format!("{} references missing {}", table, parent),
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::migration::operation::{ColumnSpec, ForeignKeySpec};
    use crate::sql::introspect;
    use rusqlite::Connection;
    use serde_json::json;

    fn setup() -> (Connection, SchemaExecutor) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF").unwrap();
        let audit = AuditTrailGenerator::new(&AuditConfig::default());
        audit.ensure_catalog(&conn).unwrap();
        (conn, SchemaExecutor::new(audit, true))
    }

    fn id() -> MigrationId {
        MigrationId::new("20240101000000").unwrap()
    }

    fn row(value: serde_json::Value) -> super::super::operation::RowValues {
        value.as_object().unwrap().clone()
    }

    fn statuses_table() -> Operation {
        Operation::CreateTable {
            table: "statuses".into(),
            columns: vec![
                ColumnSpec::new("id", "INTEGER").not_null(),
                ColumnSpec::new("name", "TEXT"),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
        }
    }

    #[test]
    fn test_execute_script_in_order() {
        let (conn, executor) = setup();
        let script = Script::new(vec![
            statuses_table(),
            Operation::InsertSeedRow {
                table: "statuses".into(),
                values: row(json!({"id": 1, "name": "open"})),
            },
            Operation::UpdateSeedRow {
                table: "statuses".into(),
                key: row(json!({"id": 1})),
                values: row(json!({"name": "opened"})),
            },
            Operation::CreateIndex {
                name: "ix_statuses_name".into(),
                table: "statuses".into(),
                columns: vec!["name".into()],
                unique: true,
            },
        ]);

        let mut session = Session::new(&conn);
        let summary = executor
            .execute(&mut session, &id(), &script, Direction::Forward)
            .unwrap();
        assert_eq!(summary.operations, 4);
        assert_eq!(summary.statements, 4);

        let name: String = conn
            .query_row("SELECT name FROM statuses WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "opened");
    }

    #[test]
    fn test_failure_reports_operation_index() {
        let (conn, executor) = setup();
        let script = Script::new(vec![
            statuses_table(),
            Operation::DeleteSeedRow {
                table: "statuses".into(),
                key: row(json!({"id": 9})),
            },
        ]);

        let mut session = Session::new(&conn);
        match executor.execute(&mut session, &id(), &script, Direction::Backward) {
            Err(MigrationError::OperationFailed {
                index,
                direction,
                source: OperationError::SeedRowMissing { key, .. },
                ..
            }) => {
                assert_eq!(index, 1);
                assert_eq!(direction, Direction::Backward);
                assert_eq!(key, "\"id\" = 9");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_foreign_key_rebuild() {
        let (conn, executor) = setup();
        conn.execute_batch(
            "CREATE TABLE statuses (id INTEGER PRIMARY KEY);
             CREATE TABLE apps (id INTEGER PRIMARY KEY, status_id INTEGER);
             INSERT INTO statuses VALUES (1);
             INSERT INTO apps VALUES (1, 1);",
        )
        .unwrap();

        let add = Operation::AddForeignKey {
            table: "apps".into(),
            foreign_key: ForeignKeySpec::new(vec!["status_id".into()], "statuses", vec!["id".into()]),
        };
        let mut session = Session::new(&conn);
        executor
            .execute(&mut session, &id(), &Script::new(vec![add]), Direction::Forward)
            .unwrap();
        assert_eq!(introspect::foreign_keys(&conn, "apps").unwrap().len(), 1);

        let drop = Operation::DropForeignKey {
            table: "apps".into(),
            columns: vec!["status_id".into()],
        };
        executor.apply_operation(&mut session, &drop).unwrap();
        assert!(introspect::foreign_keys(&conn, "apps").unwrap().is_empty());

        let result = executor.apply_operation(&mut session, &drop);
        assert!(matches!(result, Err(OperationError::ForeignKeyNotFound { .. })));
    }

    #[test]
    fn test_drop_inline_foreign_key() {
        let (conn, executor) = setup();
        let script = Script::new(vec![
            statuses_table(),
            Operation::CreateTable {
                table: "apps".into(),
                columns: vec![
                    ColumnSpec::new("id", "INTEGER").not_null(),
                    ColumnSpec::new("status_id", "INTEGER")
                        .not_null()
                        .references("statuses", "id"),
                ],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
            },
            Operation::DropForeignKey {
                table: "apps".into(),
                columns: vec!["status_id".into()],
            },
        ]);
        let mut session = Session::new(&conn);
        executor
            .execute(&mut session, &id(), &script, Direction::Forward)
            .unwrap();

        assert!(introspect::foreign_keys(&conn, "apps").unwrap().is_empty());
        let status_id = introspect::columns(&conn, "apps").unwrap().remove(1);
        assert_eq!(status_id.name, "status_id");
        assert!(status_id.not_null);
    }

    #[test]
    fn test_foreign_key_round_trip_keeps_constraints() {
        let (conn, executor) = setup();
        conn.execute_batch(
            "CREATE TABLE statuses (id INTEGER PRIMARY KEY);
             CREATE TABLE apps (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 name TEXT COLLATE NOCASE,
                 qty INTEGER CHECK (qty > 0),
                 status_id INTEGER
             );
             INSERT INTO statuses VALUES (1);
             INSERT INTO apps (name, qty, status_id) VALUES ('Alpha', 3, 1);",
        )
        .unwrap();

        let forward = Script::new(vec![Operation::AddForeignKey {
            table: "apps".into(),
            foreign_key: ForeignKeySpec::new(vec!["status_id".into()], "statuses", vec!["id".into()]),
        }]);
        let backward = Script::new(vec![Operation::DropForeignKey {
            table: "apps".into(),
            columns: vec!["status_id".into()],
        }]);
        let mut session = Session::new(&conn);
        executor
            .execute(&mut session, &id(), &forward, Direction::Forward)
            .unwrap();
        executor
            .execute(&mut session, &id(), &backward, Direction::Backward)
            .unwrap();

        let sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'apps'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(sql.contains("AUTOINCREMENT"));
        assert!(sql.contains("COLLATE NOCASE"));
        assert!(sql.contains("CHECK (qty > 0)"));

        let rejected = conn.execute("INSERT INTO apps (name, qty, status_id) VALUES ('x', -5, 1)", []);
        assert!(rejected.is_err());
        let matched: i64 = conn
            .query_row("SELECT COUNT(*) FROM apps WHERE name = 'alpha'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(matched, 1);
    }

    #[test]
    fn test_integrity_check_fails_unit() {
        let (conn, executor) = setup();
        let script = Script::new(vec![
            statuses_table(),
            Operation::CreateTable {
                table: "apps".into(),
                columns: vec![
                    ColumnSpec::new("id", "INTEGER"),
                    ColumnSpec::new("status_id", "INTEGER").references("statuses", "id"),
                ],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
            },
            Operation::RawStatement {
                sql: "INSERT INTO apps VALUES (1, 42)".into(),
            },
        ]);

        let mut session = Session::new(&conn);
        match executor.execute(&mut session, &id(), &script, Direction::Forward) {
            Err(MigrationError::IntegrityCheckFailed { violations, .. }) => {
                assert_eq!(violations.len(), 1);
                assert!(violations[0].contains("statuses"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
