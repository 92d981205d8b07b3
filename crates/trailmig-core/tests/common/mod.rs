//! Shared fixtures for integration tests.

#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use trailmig_core::migration::{
    ColumnRef, ColumnSpec, ForeignKeySpec, MigrationId, MigrationSet, MigrationUnit, Operation,
    RowValues,
};

pub fn id(s: &str) -> MigrationId {
    MigrationId::new(s).unwrap()
}

pub fn row(value: serde_json::Value) -> RowValues {
    value.as_object().unwrap().clone()
}

/// Structural description of every user object in the database.
///
/// Engine tables and SQLite internals are excluded. Row data is not part of
/// the fingerprint.
pub fn schema_fingerprint(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT type, name, tbl_name FROM sqlite_master \
             WHERE substr(name, 1, 11) != '__trailmig_' AND substr(name, 1, 7) != 'sqlite_' \
             ORDER BY type, name",
        )
        .unwrap();
    let objects: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    let mut fingerprint = Vec::new();
    for (kind, name, table) in objects {
        fingerprint.push(format!("{} {} on {}", kind, name, table));
        if kind != "table" {
            continue;
        }

        let mut columns = conn
            .prepare(
                "SELECT name, type, \"notnull\", ifnull(dflt_value, ''), pk \
                 FROM pragma_table_info(?1) ORDER BY cid",
            )
            .unwrap();
        let cols: Vec<String> = columns
            .query_map([&name], |row| {
                Ok(format!(
                    "  column {} {} notnull={} default={} pk={}",
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?
                ))
            })
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        fingerprint.extend(cols);

        let mut keys = conn
            .prepare(
                "SELECT \"from\", \"table\", ifnull(\"to\", ''), on_delete \
                 FROM pragma_foreign_key_list(?1)",
            )
            .unwrap();
        let mut fks: Vec<String> = keys
            .query_map([&name], |row| {
                Ok(format!(
                    "  fk {} -> {}({}) on delete {}",
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?
                ))
            })
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        fks.sort();
        fingerprint.extend(fks);
    }
    fingerprint
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

/// Five units exercising schema, seed, data, and audit operations.
pub fn application_units() -> Vec<MigrationUnit> {
    let statuses = MigrationUnit::new(id("20240101000000"), "create statuses")
        .with_forward(vec![
            Operation::CreateTable {
                table: "statuses".into(),
                columns: vec![
                    ColumnSpec::new("id", "INTEGER").not_null(),
                    ColumnSpec::new("name", "TEXT").not_null(),
                ],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
            },
            Operation::InsertSeedRow {
                table: "statuses".into(),
                values: row(json!({"id": 1, "name": "draft"})),
            },
            Operation::InsertSeedRow {
                table: "statuses".into(),
                values: row(json!({"id": 3, "name": "offer"})),
            },
            Operation::InsertSeedRow {
                table: "statuses".into(),
                values: row(json!({"id": 4, "name": "hired"})),
            },
        ])
        .with_backward(vec![Operation::DropTable {
            table: "statuses".into(),
        }]);

    let apps = MigrationUnit::new(id("20240102000000"), "create apps")
        .with_forward(vec![
            Operation::CreateTable {
                table: "apps".into(),
                columns: vec![
                    ColumnSpec::new("id", "INTEGER").not_null(),
                    ColumnSpec::new("status_id", "INTEGER"),
                ],
                primary_key: vec!["id".into()],
                foreign_keys: vec![ForeignKeySpec::new(
                    vec!["status_id".into()],
                    "statuses",
                    vec!["id".into()],
                )],
            },
            Operation::CreateIndex {
                name: "ix_apps_status".into(),
                table: "apps".into(),
                columns: vec!["status_id".into()],
                unique: false,
            },
            Operation::RawStatement {
                sql: "INSERT INTO apps (id, status_id) VALUES (1, 3), (2, 4), (3, 4)".into(),
            },
        ])
        .with_backward(vec![Operation::DropTable {
            table: "apps".into(),
        }]);

    let reshape = MigrationUnit::new(id("20240103000000"), "reshape apps")
        .with_forward(vec![
            Operation::AddColumn {
                table: "apps".into(),
                column: ColumnSpec::new("note", "TEXT"),
            },
            Operation::RenameColumn {
                table: "apps".into(),
                from: "status_id".into(),
                to: "offer_status_id".into(),
            },
        ])
        .with_backward(vec![
            Operation::RenameColumn {
                table: "apps".into(),
                from: "offer_status_id".into(),
                to: "status_id".into(),
            },
            Operation::DropColumn {
                table: "apps".into(),
                column: "note".into(),
            },
        ]);

    let swap = Operation::SwapCodes {
        columns: vec![
            ColumnRef::new("statuses", "id"),
            ColumnRef::new("apps", "offer_status_id"),
        ],
        first: 3,
        second: 4,
        scratch: 99,
    };
    let renumber = MigrationUnit::new(id("20240104000000"), "swap offer and hired")
        .with_forward(vec![swap.clone()])
        .with_backward(vec![swap]);

    let audit = MigrationUnit::new(id("20240105000000"), "audit apps")
        .with_forward(vec![Operation::RegenerateAudit {
            table: "apps".into(),
            columns: vec!["id".into(), "offer_status_id".into()],
            editor_column: None,
        }])
        .with_backward(vec![Operation::RevertAudit {
            table: "apps".into(),
        }]);

    vec![statuses, apps, reshape, renumber, audit]
}

pub fn application_set() -> MigrationSet {
    MigrationSet::new(application_units()).unwrap()
}
