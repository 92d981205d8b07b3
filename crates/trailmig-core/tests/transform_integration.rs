//! Integration tests for data transformations inside migration units.

mod common;

use common::{count, id};
use rusqlite::Connection;
use trailmig_core::migration::{
    CodeMapping, ColumnMapping, ColumnRef, MigrationError, MigrationSet, MigrationUnit, Operation,
    OperationError, TransformError,
};
use trailmig_core::{MigrationRunner, RollbackTarget, RunnerConfig};

fn setup_unit() -> MigrationUnit {
    MigrationUnit::new(id("20240101000000"), "create tables")
        .with_forward(vec![Operation::RawStatement {
            sql: "CREATE TABLE apps (id INTEGER PRIMARY KEY, status_id INTEGER);
                  CREATE TABLE history (id INTEGER PRIMARY KEY, app_id INTEGER, status_id INTEGER);
                  INSERT INTO apps VALUES (1, 3), (2, 4), (3, 4), (4, 1);
                  INSERT INTO history VALUES (1, 1, 4), (2, 2, 3), (3, 4, 2);"
                .into(),
        }])
        .with_backward(vec![Operation::RawStatement {
            sql: "DROP TABLE history; DROP TABLE apps;".into(),
        }])
}

fn status_columns() -> Vec<ColumnRef> {
    vec![
        ColumnRef::new("apps", "status_id"),
        ColumnRef::new("history", "status_id"),
    ]
}

fn runner(units: Vec<MigrationUnit>) -> MigrationRunner {
    MigrationRunner::with_connection(
        Connection::open_in_memory().unwrap(),
        MigrationSet::new(units).unwrap(),
        RunnerConfig::in_memory(),
    )
    .unwrap()
}

fn codes(conn: &Connection, table: &str) -> Vec<i64> {
    let mut stmt = conn
        .prepare(&format!("SELECT status_id FROM {} ORDER BY id", table))
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

#[test]
fn test_swap_through_scratch() {
    let swap = Operation::SwapCodes {
        columns: status_columns(),
        first: 3,
        second: 4,
        scratch: 99,
    };
    let runner = runner(vec![
        setup_unit(),
        MigrationUnit::new(id("20240102000000"), "swap offer and hired")
            .with_forward(vec![swap.clone()])
            .with_backward(vec![swap]),
    ]);

    let report = runner.apply(None).unwrap();
    let conn = runner.connection();
    assert_eq!(codes(conn, "apps"), vec![4, 3, 3, 1]);
    assert_eq!(codes(conn, "history"), vec![3, 4, 2]);
    assert_eq!(count(conn, "SELECT COUNT(*) FROM apps WHERE status_id = 99"), 0);

    // Parking on the scratch value happens before anything lands on 3.
    let statements: Vec<&str> = report.units[1].statements.iter().map(String::as_str).collect();
    let park = statements
        .iter()
        .position(|s| s.contains("= 99 WHERE"))
        .unwrap();
    let land = statements
        .iter()
        .position(|s| s.contains("= 3 WHERE"))
        .unwrap();
    assert!(park < land);

    runner.rollback(RollbackTarget::Previous).unwrap();
    assert_eq!(codes(conn, "apps"), vec![3, 4, 4, 1]);
    assert_eq!(codes(conn, "history"), vec![4, 3, 2]);
}

#[test]
fn test_scratch_value_in_use_fails_unit() {
    let runner = runner(vec![
        setup_unit(),
        MigrationUnit::new(id("20240102000000"), "bad scratch").with_forward(vec![
            Operation::SwapCodes {
                columns: status_columns(),
                first: 3,
                second: 4,
                scratch: 2,
            },
        ]),
    ]);

    match runner.apply(None) {
        Err(MigrationError::OperationFailed {
            source:
                OperationError::Transform(TransformError::ScratchValueInUse {
                    table,
                    column,
                    value,
                    rows,
                }),
            ..
        }) => {
            assert_eq!(table, "history");
            assert_eq!(column, "status_id");
            assert_eq!(value, 2);
            assert_eq!(rows, 1);
        }
        other => panic!("unexpected result {:?}", other.map(|r| r.units.len())),
    }
    assert_eq!(codes(runner.connection(), "apps"), vec![3, 4, 4, 1]);
    assert_eq!(
        runner.status().unwrap().current,
        Some(id("20240101000000"))
    );
}

#[test]
fn test_remap_cycle() {
    let mapping = |pairs: &[(i64, i64)]| -> Vec<CodeMapping> {
        pairs
            .iter()
            .map(|&(from, to)| CodeMapping { from, to })
            .collect()
    };
    let runner = runner(vec![
        setup_unit(),
        MigrationUnit::new(id("20240102000000"), "rotate codes")
            .with_forward(vec![Operation::RemapCodes {
                columns: status_columns(),
                mapping: mapping(&[(1, 3), (3, 4), (4, 1)]),
                scratch_base: 1000,
            }])
            .with_backward(vec![Operation::RemapCodes {
                columns: status_columns(),
                mapping: mapping(&[(3, 1), (4, 3), (1, 4)]),
                scratch_base: 1000,
            }]),
    ]);

    runner.apply(None).unwrap();
    let conn = runner.connection();
    assert_eq!(codes(conn, "apps"), vec![4, 1, 1, 3]);
    assert_eq!(codes(conn, "history"), vec![1, 4, 2]);

    runner.rollback(RollbackTarget::Previous).unwrap();
    assert_eq!(codes(conn, "apps"), vec![3, 4, 4, 1]);
    assert_eq!(codes(conn, "history"), vec![4, 3, 2]);
}

#[test]
fn test_copy_and_backfill() {
    let runner = runner(vec![
        setup_unit(),
        MigrationUnit::new(id("20240102000000"), "archive hired")
            .with_forward(vec![
                Operation::RawStatement {
                    sql: "CREATE TABLE archive (app_id INTEGER, status_id INTEGER, note TEXT)"
                        .into(),
                },
                Operation::CopyRows {
                    from_table: "apps".into(),
                    to_table: "archive".into(),
                    columns: vec![
                        ColumnMapping {
                            from: "id".into(),
                            to: "app_id".into(),
                        },
                        ColumnMapping {
                            from: "status_id".into(),
                            to: "status_id".into(),
                        },
                    ],
                    filter: Some("status_id = 4".into()),
                },
                Operation::Backfill {
                    table: "archive".into(),
                    column: "note".into(),
                    value: "'archived #' || app_id".into(),
                    filter: None,
                },
            ])
            .with_backward(vec![Operation::DropTable {
                table: "archive".into(),
            }]),
    ]);

    runner.apply(None).unwrap();
    let conn = runner.connection();
    assert_eq!(count(conn, "SELECT COUNT(*) FROM archive"), 2);
    let note: String = conn
        .query_row("SELECT note FROM archive WHERE app_id = 3", [], |r| r.get(0))
        .unwrap();
    assert_eq!(note, "archived #3");

    runner.rollback(RollbackTarget::Previous).unwrap();
    assert_eq!(
        count(
            conn,
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'archive'"
        ),
        0
    );
}

#[test]
fn test_swap_is_captured_by_audit() {
    let swap = Operation::SwapCodes {
        columns: vec![ColumnRef::new("apps", "status_id")],
        first: 3,
        second: 4,
        scratch: 99,
    };
    let runner = runner(vec![
        setup_unit(),
        MigrationUnit::new(id("20240102000000"), "audit apps").with_forward(vec![
            Operation::RegenerateAudit {
                table: "apps".into(),
                columns: vec!["id".into(), "status_id".into()],
                editor_column: None,
            },
        ]),
        MigrationUnit::new(id("20240103000000"), "swap")
            .with_forward(vec![swap.clone()])
            .with_backward(vec![swap]),
    ]);
    runner.apply(None).unwrap();

    // Row 1 is parked on 99 and then moved to 4; rows 2 and 3 move once.
    let conn = runner.connection();
    assert_eq!(
        count(conn, "SELECT COUNT(*) FROM audit_apps_g1 WHERE operation_code = 2"),
        4
    );
    assert_eq!(
        count(
            conn,
            "SELECT COUNT(*) FROM audit_apps_g1 WHERE status_id = 99"
        ),
        1
    );
}
