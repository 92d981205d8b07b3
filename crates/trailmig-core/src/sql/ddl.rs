//! Statement rendering for schema and seed-row operations.

use super::{column_list, json_literal, quote_ident};
use crate::migration::error::OperationError;
use crate::migration::operation::{ColumnSpec, ForeignKeySpec, RowValues};

/// Render a column definition.
pub fn column_def(column: &ColumnSpec) -> String {
    let mut def = quote_ident(&column.name);
    if let Some(sql_type) = &column.sql_type {
        def.push(' ');
        def.push_str(sql_type);
    }
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(" DEFAULT ");
        def.push_str(default);
    }
    if let Some(target) = &column.references {
        def.push_str(&format!(
            " REFERENCES {} ({})",
            quote_ident(&target.table),
            quote_ident(&target.column)
        ));
    }
    def
}

/// Render a table-level foreign key clause.
pub fn foreign_key_clause(fk: &ForeignKeySpec) -> String {
    let mut clause = format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        column_list(&fk.columns),
        quote_ident(&fk.references_table),
        column_list(&fk.references_columns)
    );
    if let Some(action) = fk.on_delete {
        clause.push_str(" ON DELETE ");
        clause.push_str(action.as_sql());
    }
    clause
}

/// Render `CREATE TABLE`.
pub fn create_table(
    table: &str,
    columns: &[ColumnSpec],
    primary_key: &[String],
    foreign_keys: &[ForeignKeySpec],
) -> String {
    let mut parts: Vec<String> = columns.iter().map(column_def).collect();
    if !primary_key.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", column_list(primary_key)));
    }
    parts.extend(foreign_keys.iter().map(foreign_key_clause));
    format!("CREATE TABLE {} ({})", quote_ident(table), parts.join(", "))
}

/// Render `CREATE [UNIQUE] INDEX`.
pub fn create_index(name: &str, table: &str, columns: &[String], unique: bool) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        quote_ident(name),
        quote_ident(table),
        column_list(columns)
    )
}

fn literal(column: &str, value: &serde_json::Value) -> Result<String, OperationError> {
    json_literal(value).ok_or_else(|| OperationError::UnsupportedValue {
        column: column.to_string(),
        value: value.to_string(),
    })
}

/// Render a `WHERE` predicate matching every key column.
///
/// A `null` key value matches with `IS NULL`.
pub fn key_predicate(key: &RowValues) -> Result<String, OperationError> {
    let mut terms = Vec::with_capacity(key.len());
    for (column, value) in key {
        if value.is_null() {
            terms.push(format!("{} IS NULL", quote_ident(column)));
        } else {
            terms.push(format!("{} = {}", quote_ident(column), literal(column, value)?));
        }
    }
    Ok(terms.join(" AND "))
}

/// Render `INSERT` of one row.
pub fn insert_row(table: &str, values: &RowValues) -> Result<String, OperationError> {
    let columns: Vec<&String> = values.keys().collect();
    let literals = values
        .iter()
        .map(|(column, value)| literal(column, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        column_list(&columns),
        literals.join(", ")
    ))
}

/// Render `UPDATE` of the rows matching `key`.
pub fn update_rows(
    table: &str,
    key: &RowValues,
    values: &RowValues,
) -> Result<String, OperationError> {
    let assignments = values
        .iter()
        .map(|(column, value)| {
            literal(column, value).map(|lit| format!("{} = {}", quote_ident(column), lit))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(table),
        assignments.join(", "),
        key_predicate(key)?
    ))
}

/// Render `DELETE` of the rows matching `key`.
pub fn delete_rows(table: &str, key: &RowValues) -> Result<String, OperationError> {
    Ok(format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table),
        key_predicate(key)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::operation::ReferentialAction;
    use serde_json::json;

    fn row(value: serde_json::Value) -> RowValues {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_create_table() {
        let sql = create_table(
            "apps",
            &[
                ColumnSpec::new("id", "INTEGER").not_null(),
                ColumnSpec::new("status_id", "INTEGER")
                    .with_default("1")
                    .references("statuses", "id"),
            ],
            &["id".to_string()],
            &[ForeignKeySpec::new(vec!["id".into()], "owners", vec!["app_id".into()])
                .on_delete(ReferentialAction::Cascade)],
        );
        assert_eq!(
            sql,
            "CREATE TABLE \"apps\" (\"id\" INTEGER NOT NULL, \
             \"status_id\" INTEGER DEFAULT 1 REFERENCES \"statuses\" (\"id\"), \
             PRIMARY KEY (\"id\"), \
             FOREIGN KEY (\"id\") REFERENCES \"owners\" (\"app_id\") ON DELETE CASCADE)"
        );
    }

    #[test]
    fn test_create_index() {
        assert_eq!(
            create_index("ix_apps_status", "apps", &["status_id".into()], true),
            "CREATE UNIQUE INDEX \"ix_apps_status\" ON \"apps\" (\"status_id\")"
        );
    }

    #[test]
    fn test_seed_statements() {
        let values = row(json!({"id": 3, "name": "Offer's out"}));
        assert_eq!(
            insert_row("statuses", &values).unwrap(),
            "INSERT INTO \"statuses\" (\"id\", \"name\") VALUES (3, 'Offer''s out')"
        );

        let key = row(json!({"id": 3, "parent": null}));
        assert_eq!(
            delete_rows("statuses", &key).unwrap(),
            "DELETE FROM \"statuses\" WHERE \"id\" = 3 AND \"parent\" IS NULL"
        );

        let sql = update_rows("statuses", &row(json!({"id": 3})), &row(json!({"name": "x"})))
            .unwrap();
        assert_eq!(sql, "UPDATE \"statuses\" SET \"name\" = 'x' WHERE \"id\" = 3");
    }

    #[test]
    fn test_rejects_structured_values() {
        let values = row(json!({"tags": ["a", "b"]}));
        match insert_row("apps", &values) {
            Err(OperationError::UnsupportedValue { column, .. }) => assert_eq!(column, "tags"),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
