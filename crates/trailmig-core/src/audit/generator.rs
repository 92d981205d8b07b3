//! Shadow table and capture trigger generation.

use super::catalog::{AuditCatalog, AuditShadowTable, CapturedColumn};
use super::event::CaptureEvent;
use super::{
    AuditError, CAPTURED_AT_COLUMN, LAST_EDITOR_COLUMN, OPERATION_CODE_COLUMN, RESERVED_COLUMNS,
    SHADOW_ROW_ID_COLUMN,
};
use crate::config::AuditConfig;
use crate::sql::introspect::{self, ColumnInfo};
use crate::sql::{column_list, quote_ident, Session};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};

/// Name of the capture trigger for one event of a shadow table.
pub fn trigger_name(shadow_table: &str, event: CaptureEvent) -> String {
    format!("{}_{}", shadow_table, event)
}

/// Creates, moves, and retires audit shadow tables and their triggers.
#[derive(Debug, Clone)]
pub struct AuditTrailGenerator {
    catalog: AuditCatalog,
    shadow_prefix: String,
}

impl AuditTrailGenerator {
    /// Create a generator from configuration.
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            catalog: AuditCatalog::new(config.catalog_table.clone()),
            shadow_prefix: config.shadow_prefix.clone(),
        }
    }

    /// The generation catalog.
    pub fn catalog(&self) -> &AuditCatalog {
        &self.catalog
    }

    /// Create the catalog table if missing.
    pub fn ensure_catalog(&self, conn: &Connection) -> rusqlite::Result<()> {
        self.catalog.ensure_table(conn)
    }

    /// Shadow table name for a generation.
    pub fn shadow_table_name(&self, source: &str, generation: i64) -> String {
        format!("{}{}_g{}", self.shadow_prefix, source, generation)
    }

    /// Every generation recorded for a source table, oldest first.
    pub fn shadow_tables(
        &self,
        conn: &Connection,
        source: &str,
    ) -> Result<Vec<AuditShadowTable>, AuditError> {
        self.catalog.generations(conn, source)
    }

    /// Start a new generation capturing `columns` of `source`.
    ///
    /// The live triggers move to the new shadow table; the previous generation
    /// is kept, inactive, with everything it captured.
    pub fn regenerate(
        &self,
        session: &mut Session<'_>,
        source: &str,
        columns: &[String],
        editor_column: Option<&str>,
    ) -> Result<AuditShadowTable, AuditError> {
        let conn = session.connection();
        let live = introspect::columns(conn, source)?;
        if live.is_empty() {
            return Err(AuditError::SourceTableMissing {
                table: source.to_string(),
            });
        }

        let lookup = |name: &str| -> Result<&ColumnInfo, AuditError> {
            live.iter()
                .find(|c| c.name == name)
                .ok_or_else(|| AuditError::UnknownColumn {
                    table: source.to_string(),
                    column: name.to_string(),
                })
        };

        let mut captured = Vec::with_capacity(columns.len());
        for name in columns {
            if RESERVED_COLUMNS.contains(&name.as_str()) {
                return Err(AuditError::ReservedColumn {
                    column: name.clone(),
                });
            }
            let info = lookup(name)?;
            captured.push(CapturedColumn {
                name: info.name.clone(),
                source: info.name.clone(),
                sql_type: info.sql_type.clone(),
            });
        }
        let editor_type = match editor_column {
            Some(editor) => lookup(editor)?.sql_type.clone(),
            None => String::new(),
        };

        let previous = self.catalog.active(conn, source)?;
        if let Some(previous) = &previous {
            self.drop_triggers(session, &previous.shadow_table)?;
            self.catalog
                .set_active(session, source, previous.generation, false)?;
        }

        let mut generation = self.catalog.latest_generation(session.connection(), source)? + 1;
        let mut shadow_table = self.shadow_table_name(source, generation);
        while introspect::table_exists(session.connection(), &shadow_table)? {
            generation += 1;
            shadow_table = self.shadow_table_name(source, generation);
        }

        let shadow = AuditShadowTable {
            source_table: source.to_string(),
            generation,
            shadow_table,
            columns: captured,
            editor_column: editor_column.map(str::to_string),
            active: true,
            created_at: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        };

        session.execute(create_shadow_sql(&shadow, &editor_type))?;
        self.create_triggers(session, &shadow)?;
        self.catalog.insert(session, &shadow)?;

        info!(
            source = %source,
            generation = shadow.generation,
            shadow_table = %shadow.shadow_table,
            "audit generation created"
        );
        Ok(shadow)
    }

    /// Undo the newest generation of `source`.
    ///
    /// The generation's triggers are dropped. Its shadow table is dropped when
    /// it captured nothing, otherwise kept inactive. Capture resumes into the
    /// newest earlier generation still on record, which is returned.
    pub fn revert(
        &self,
        session: &mut Session<'_>,
        source: &str,
    ) -> Result<Option<AuditShadowTable>, AuditError> {
        let current = self
            .catalog
            .active(session.connection(), source)?
            .ok_or_else(|| AuditError::NoActiveGeneration {
                table: source.to_string(),
            })?;

        self.drop_triggers(session, &current.shadow_table)?;

        let captured = session.count(&format!(
            "SELECT COUNT(*) FROM {}",
            quote_ident(&current.shadow_table)
        ))?;
        if captured == 0 {
            session.execute(format!("DROP TABLE {}", quote_ident(&current.shadow_table)))?;
            self.catalog.delete(session, source, current.generation)?;
        } else {
            warn!(
                shadow_table = %current.shadow_table,
                rows = captured,
                "retaining non-empty audit shadow table"
            );
            self.catalog
                .set_active(session, source, current.generation, false)?;
        }

        let earlier = self
            .catalog
            .generations(session.connection(), source)?
            .into_iter()
            .filter(|g| g.generation < current.generation)
            .last();
        let Some(mut earlier) = earlier else {
            return Ok(None);
        };

        self.create_triggers(session, &earlier)?;
        self.catalog
            .set_active(session, source, earlier.generation, true)?;
        earlier.active = true;

        info!(
            source = %source,
            generation = earlier.generation,
            "audit capture resumed on earlier generation"
        );
        Ok(Some(earlier))
    }

    /// Follow a source table rename in the catalog.
    ///
    /// The triggers themselves follow the table in SQLite.
    pub fn table_renamed(
        &self,
        session: &mut Session<'_>,
        from: &str,
        to: &str,
    ) -> Result<(), AuditError> {
        self.catalog.rename_source(session, from, to)?;
        Ok(())
    }

    /// Follow a source column rename in every generation's column mapping.
    pub fn column_renamed(
        &self,
        session: &mut Session<'_>,
        table: &str,
        from: &str,
        to: &str,
    ) -> Result<(), AuditError> {
        for mut shadow in self.catalog.generations(session.connection(), table)? {
            let mut changed = false;
            for column in shadow.columns.iter_mut().filter(|c| c.source == from) {
                column.source = to.to_string();
                changed = true;
            }
            if shadow.editor_column.as_deref() == Some(from) {
                shadow.editor_column = Some(to.to_string());
                changed = true;
            }
            if changed {
                self.catalog.set_columns(session, &shadow)?;
            }
        }
        Ok(())
    }

    /// Mark a dropped source table's generations inactive.
    ///
    /// Shadow tables are kept; SQLite drops the triggers with the table.
    pub fn table_dropped(&self, session: &mut Session<'_>, table: &str) -> Result<(), AuditError> {
        if self.catalog.deactivate_source(session, table)? > 0 {
            info!(source = %table, "audit capture stopped for dropped table");
        }
        Ok(())
    }

    fn drop_triggers(&self, session: &mut Session<'_>, shadow_table: &str) -> Result<(), AuditError> {
        for event in CaptureEvent::ALL {
            session.execute(format!(
                "DROP TRIGGER IF EXISTS {}",
                quote_ident(&trigger_name(shadow_table, event))
            ))?;
        }
        Ok(())
    }

    fn create_triggers(
        &self,
        session: &mut Session<'_>,
        shadow: &AuditShadowTable,
    ) -> Result<(), AuditError> {
        for event in CaptureEvent::ALL {
            session.execute_batch(create_trigger_sql(shadow, event))?;
        }
        Ok(())
    }
}

fn create_shadow_sql(shadow: &AuditShadowTable, editor_type: &str) -> String {
    let typed = |name: &str, sql_type: &str| {
        if sql_type.is_empty() {
            quote_ident(name)
        } else {
            format!("{} {}", quote_ident(name), sql_type)
        }
    };

    let mut parts: Vec<String> = shadow
        .columns
        .iter()
        .map(|c| typed(&c.name, &c.sql_type))
        .collect();
    parts.push(format!("{} INTEGER PRIMARY KEY", quote_ident(SHADOW_ROW_ID_COLUMN)));
    parts.push(format!("{} INTEGER NOT NULL", quote_ident(OPERATION_CODE_COLUMN)));
    parts.push(format!("{} TEXT NOT NULL", quote_ident(CAPTURED_AT_COLUMN)));
    parts.push(typed(LAST_EDITOR_COLUMN, editor_type));

    format!(
        "CREATE TABLE {} ({})",
        quote_ident(&shadow.shadow_table),
        parts.join(", ")
    )
}

fn create_trigger_sql(shadow: &AuditShadowTable, event: CaptureEvent) -> String {
    let row = event.row_alias();

    let mut targets: Vec<&str> = shadow.column_names();
    targets.extend([OPERATION_CODE_COLUMN, CAPTURED_AT_COLUMN, LAST_EDITOR_COLUMN]);

    let mut values: Vec<String> = shadow
        .columns
        .iter()
        .map(|c| format!("{}.{}", row, quote_ident(&c.source)))
        .collect();
    values.push(event.operation_code().to_string());
    values.push("strftime('%Y-%m-%dT%H:%M:%fZ', 'now')".to_string());
    values.push(match &shadow.editor_column {
        Some(editor) => format!("{}.{}", row, quote_ident(editor)),
        None => "NULL".to_string(),
    });

    format!(
        "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW BEGIN \
         INSERT INTO {} ({}) VALUES ({}); END",
        quote_ident(&trigger_name(&shadow.shadow_table, event)),
        event.as_sql(),
        quote_ident(&shadow.source_table),
        quote_ident(&shadow.shadow_table),
        column_list(&targets),
        values.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::introspect::trigger_names;

    fn setup() -> (Connection, AuditTrailGenerator) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE apps (id INTEGER PRIMARY KEY, status_id INTEGER, editor TEXT)",
        )
        .unwrap();
        let generator = AuditTrailGenerator::new(&AuditConfig::default());
        generator.ensure_catalog(&conn).unwrap();
        (conn, generator)
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_trigger_name() {
        assert_eq!(trigger_name("audit_apps_g1", CaptureEvent::Update), "audit_apps_g1_update");
    }

    #[test]
    fn test_regenerate_creates_first_generation() {
        let (conn, generator) = setup();
        let mut session = Session::new(&conn);
        let shadow = generator
            .regenerate(
                &mut session,
                "apps",
                &["id".into(), "status_id".into()],
                Some("editor"),
            )
            .unwrap();

        assert_eq!(shadow.generation, 1);
        assert_eq!(shadow.shadow_table, "audit_apps_g1");
        assert_eq!(
            trigger_names(&conn, "apps").unwrap(),
            vec!["audit_apps_g1_delete", "audit_apps_g1_insert", "audit_apps_g1_update"]
        );

        conn.execute_batch(
            "INSERT INTO apps VALUES (1, 3, 'ana');
             UPDATE apps SET status_id = 4, editor = 'bo' WHERE id = 1;
             DELETE FROM apps WHERE id = 1;",
        )
        .unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT status_id, operation_code, last_editor_id FROM audit_apps_g1 \
                 ORDER BY shadow_row_id",
            )
            .unwrap();
        let rows: Vec<(i64, i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            rows,
            vec![(3, 1, "ana".into()), (4, 2, "bo".into()), (4, 3, "bo".into())]
        );
    }

    #[test]
    fn test_regenerate_unknown_column() {
        let (conn, generator) = setup();
        let mut session = Session::new(&conn);
        let result = generator.regenerate(&mut session, "apps", &["nope".into()], None);
        assert!(matches!(result, Err(AuditError::UnknownColumn { .. })));

        let result = generator.regenerate(&mut session, "missing", &["id".into()], None);
        assert!(matches!(result, Err(AuditError::SourceTableMissing { .. })));
        assert!(session.statements().is_empty());
    }

    #[test]
    fn test_regenerate_moves_triggers() {
        let (conn, generator) = setup();
        let mut session = Session::new(&conn);
        generator
            .regenerate(&mut session, "apps", &["id".into()], None)
            .unwrap();
        conn.execute("INSERT INTO apps VALUES (1, 3, NULL)", []).unwrap();

        let second = generator
            .regenerate(&mut session, "apps", &["id".into(), "status_id".into()], None)
            .unwrap();
        assert_eq!(second.shadow_table, "audit_apps_g2");
        conn.execute("INSERT INTO apps VALUES (2, 3, NULL)", []).unwrap();

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM audit_apps_g1"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM audit_apps_g2"), 1);

        let generations = generator.shadow_tables(&conn, "apps").unwrap();
        assert_eq!(generations.len(), 2);
        assert!(!generations[0].active);
        assert!(generations[1].active);
        assert_eq!(trigger_names(&conn, "apps").unwrap().len(), 3);
    }

    #[test]
    fn test_revert_drops_empty_generation() {
        let (conn, generator) = setup();
        let mut session = Session::new(&conn);
        generator
            .regenerate(&mut session, "apps", &["id".into()], None)
            .unwrap();
        generator
            .regenerate(&mut session, "apps", &["id".into(), "status_id".into()], None)
            .unwrap();

        let resumed = generator.revert(&mut session, "apps").unwrap().unwrap();
        assert_eq!(resumed.generation, 1);
        assert!(!introspect::table_exists(&conn, "audit_apps_g2").unwrap());
        assert_eq!(generator.shadow_tables(&conn, "apps").unwrap().len(), 1);

        conn.execute("INSERT INTO apps VALUES (1, 3, NULL)", []).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM audit_apps_g1"), 1);

        generator.revert(&mut session, "apps").unwrap();
        assert!(introspect::table_exists(&conn, "audit_apps_g1").unwrap());
        assert!(trigger_names(&conn, "apps").unwrap().is_empty());
        assert!(matches!(
            generator.revert(&mut session, "apps"),
            Err(AuditError::NoActiveGeneration { .. })
        ));
    }

    #[test]
    fn test_column_rename_follows_catalog() {
        let (conn, generator) = setup();
        let mut session = Session::new(&conn);
        generator
            .regenerate(&mut session, "apps", &["id".into(), "status_id".into()], None)
            .unwrap();

        session
            .execute("ALTER TABLE apps RENAME COLUMN status_id TO offer_status_id")
            .unwrap();
        generator
            .column_renamed(&mut session, "apps", "status_id", "offer_status_id")
            .unwrap();

        let shadow = generator.catalog().active(&conn, "apps").unwrap().unwrap();
        assert_eq!(shadow.columns[1].name, "status_id");
        assert_eq!(shadow.columns[1].source, "offer_status_id");
    }
}
