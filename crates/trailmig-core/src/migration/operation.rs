//! Declarative schema and data operations.
//!
//! A [`Script`](super::Script) is an ordered list of these operations. Each one
//! is a tagged record so scripts can be authored as JSON, diffed, and validated
//! without any host-language builder API.

use crate::audit::RESERVED_COLUMNS;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Column values keyed by column name.
pub type RowValues = Map<String, Value>;

fn default_true() -> bool {
    true
}

/// A reference to one column of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Create a column reference.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Column definition used by `CreateTable` and `AddColumn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Declared SQL type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
    /// Whether NULL is allowed.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Default value as a SQL expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Inline foreign key reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ColumnRef>,
}

impl ColumnSpec {
    /// A nullable column of the given type.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: Some(sql_type.into()),
            nullable: true,
            default: None,
            references: None,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the default expression.
    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Reference another table's column.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ColumnRef::new(table, column));
        self
    }
}

/// Action taken on referencing rows when the referenced row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// No action.
    NoAction,
    /// Refuse the change.
    Restrict,
    /// Propagate the change.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
    /// Set referencing columns to their defaults.
    SetDefault,
}

impl ReferentialAction {
    /// SQL spelling of the action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Table-level foreign key definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
    /// Action on delete of the referenced row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
}

impl ForeignKeySpec {
    /// Create a foreign key definition.
    pub fn new(
        columns: Vec<String>,
        references_table: impl Into<String>,
        references_columns: Vec<String>,
    ) -> Self {
        Self {
            columns,
            references_table: references_table.into(),
            references_columns,
            on_delete: None,
        }
    }

    /// Set the delete action.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }
}

/// One code renumbering in a `RemapCodes` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMapping {
    /// Current code.
    pub from: i64,
    /// New code.
    pub to: i64,
}

/// Column pairing for `CopyRows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Source expression (usually a column name of the source table).
    pub from: String,
    /// Destination column.
    pub to: String,
}

/// A single schema or data operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table.
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        primary_key: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        foreign_keys: Vec<ForeignKeySpec>,
    },
    /// Drop a table.
    DropTable { table: String },
    /// Rename a table.
    RenameTable { from: String, to: String },
    /// Add a column.
    AddColumn { table: String, column: ColumnSpec },
    /// Drop a column.
    DropColumn { table: String, column: String },
    /// Rename a column.
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    /// Add a foreign key to an existing table.
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeySpec,
    },
    /// Drop the foreign key defined on the given columns.
    DropForeignKey { table: String, columns: Vec<String> },
    /// Create an index.
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    /// Drop an index.
    DropIndex { name: String },
    /// Insert one seed row.
    InsertSeedRow { table: String, values: RowValues },
    /// Delete the seed row matching the key.
    DeleteSeedRow { table: String, key: RowValues },
    /// Update the seed row matching the key.
    UpdateSeedRow {
        table: String,
        key: RowValues,
        values: RowValues,
    },
    /// Execute SQL verbatim.
    RawStatement { sql: String },
    /// Swap two codes across every listed column through a scratch value.
    SwapCodes {
        columns: Vec<ColumnRef>,
        first: i64,
        second: i64,
        scratch: i64,
    },
    /// Renumber codes across every listed column through scratch slots.
    RemapCodes {
        columns: Vec<ColumnRef>,
        mapping: Vec<CodeMapping>,
        scratch_base: i64,
    },
    /// Set a column from a SQL expression.
    Backfill {
        table: String,
        column: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    /// Copy rows from one table into another.
    CopyRows {
        from_table: String,
        to_table: String,
        columns: Vec<ColumnMapping>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    /// Start a new audit shadow-table generation for a table.
    RegenerateAudit {
        table: String,
        columns: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        editor_column: Option<String>,
    },
    /// Undo the newest audit generation of a table.
    RevertAudit { table: String },
}

impl Operation {
    /// Get a description of this operation.
    pub fn description(&self) -> String {
        match self {
            Operation::CreateTable { table, .. } => format!("create table '{}'", table),
            Operation::DropTable { table } => format!("drop table '{}'", table),
            Operation::RenameTable { from, to } => format!("rename table '{}' to '{}'", from, to),
            Operation::AddColumn { table, column } => {
                format!("add column '{}.{}'", table, column.name)
            }
            Operation::DropColumn { table, column } => {
                format!("drop column '{}.{}'", table, column)
            }
            Operation::RenameColumn { table, from, to } => {
                format!("rename column '{}.{}' to '{}'", table, from, to)
            }
            Operation::AddForeignKey { table, foreign_key } => format!(
                "add foreign key '{}'({}) -> '{}'",
                table,
                foreign_key.columns.join(", "),
                foreign_key.references_table
            ),
            Operation::DropForeignKey { table, columns } => {
                format!("drop foreign key '{}'({})", table, columns.join(", "))
            }
            Operation::CreateIndex { name, table, .. } => {
                format!("create index '{}' on '{}'", name, table)
            }
            Operation::DropIndex { name } => format!("drop index '{}'", name),
            Operation::InsertSeedRow { table, .. } => format!("insert seed row into '{}'", table),
            Operation::DeleteSeedRow { table, .. } => format!("delete seed row from '{}'", table),
            Operation::UpdateSeedRow { table, .. } => format!("update seed row in '{}'", table),
            Operation::RawStatement { sql } => {
                let head: String = sql.trim().chars().take(48).collect();
                format!("raw statement '{}'", head)
            }
            Operation::SwapCodes { first, second, .. } => {
                format!("swap codes {} and {}", first, second)
            }
            Operation::RemapCodes { mapping, .. } => format!("remap {} code(s)", mapping.len()),
            Operation::Backfill { table, column, .. } => {
                format!("backfill '{}.{}'", table, column)
            }
            Operation::CopyRows {
                from_table,
                to_table,
                ..
            } => format!("copy rows from '{}' to '{}'", from_table, to_table),
            Operation::RegenerateAudit { table, .. } => {
                format!("regenerate audit trail for '{}'", table)
            }
            Operation::RevertAudit { table } => format!("revert audit trail for '{}'", table),
        }
    }

    /// Check the operation is well formed.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Operation::CreateTable {
                table,
                columns,
                primary_key,
                foreign_keys,
            } => {
                require_name("table", table)?;
                if columns.is_empty() {
                    return Err(format!("table '{}' has no columns", table));
                }
                let mut seen = HashSet::new();
                for column in columns {
                    require_name("column", &column.name)?;
                    if !seen.insert(column.name.as_str()) {
                        return Err(format!("column '{}' defined twice", column.name));
                    }
                }
                for key in primary_key {
                    if !seen.contains(key.as_str()) {
                        return Err(format!("primary key column '{}' is not defined", key));
                    }
                }
                for fk in foreign_keys {
                    validate_foreign_key(fk)?;
                }
                Ok(())
            }
            Operation::DropTable { table } => require_name("table", table),
            Operation::RenameTable { from, to } | Operation::RenameColumn { from, to, .. } => {
                require_name("name", from)?;
                require_name("name", to)?;
                if from == to {
                    return Err(format!("rename of '{}' to itself", from));
                }
                Ok(())
            }
            Operation::AddColumn { table, column } => {
                require_name("table", table)?;
                require_name("column", &column.name)
            }
            Operation::DropColumn { table, column } => {
                require_name("table", table)?;
                require_name("column", column)
            }
            Operation::AddForeignKey { table, foreign_key } => {
                require_name("table", table)?;
                validate_foreign_key(foreign_key)
            }
            Operation::DropForeignKey { table, columns } => {
                require_name("table", table)?;
                require_columns(columns)
            }
            Operation::CreateIndex {
                name,
                table,
                columns,
                ..
            } => {
                require_name("index", name)?;
                require_name("table", table)?;
                require_columns(columns)
            }
            Operation::DropIndex { name } => require_name("index", name),
            Operation::InsertSeedRow { table, values } => {
                require_name("table", table)?;
                require_values("values", values)
            }
            Operation::DeleteSeedRow { table, key } => {
                require_name("table", table)?;
                require_values("key", key)
            }
            Operation::UpdateSeedRow { table, key, values } => {
                require_name("table", table)?;
                require_values("key", key)?;
                require_values("values", values)
            }
            Operation::RawStatement { sql } => {
                if sql.trim().is_empty() {
                    return Err("raw statement is empty".to_string());
                }
                Ok(())
            }
            Operation::SwapCodes {
                columns,
                first,
                second,
                scratch,
            } => {
                validate_column_refs(columns)?;
                if first == second || first == scratch || second == scratch {
                    return Err(format!(
                        "swap needs three distinct values, got {}, {} and scratch {}",
                        first, second, scratch
                    ));
                }
                Ok(())
            }
            Operation::RemapCodes {
                columns,
                mapping,
                scratch_base,
            } => {
                validate_column_refs(columns)?;
                if mapping.is_empty() {
                    return Err("remap has no mappings".to_string());
                }
                let mut sources = HashSet::new();
                let mut targets = HashSet::new();
                for m in mapping {
                    if !sources.insert(m.from) {
                        return Err(format!("code {} is remapped twice", m.from));
                    }
                    if !targets.insert(m.to) {
                        return Err(format!("code {} is the target of two mappings", m.to));
                    }
                }
                let scratch_end = scratch_base
                    .checked_add(mapping.len() as i64)
                    .ok_or_else(|| "scratch range overflows".to_string())?;
                let overlaps = |code: &i64| (*scratch_base..scratch_end).contains(code);
                if sources.iter().chain(targets.iter()).any(overlaps) {
                    return Err(format!(
                        "scratch range {}..{} overlaps the remapped codes",
                        scratch_base, scratch_end
                    ));
                }
                Ok(())
            }
            Operation::Backfill {
                table,
                column,
                value,
                ..
            } => {
                require_name("table", table)?;
                require_name("column", column)?;
                if value.trim().is_empty() {
                    return Err("backfill value is empty".to_string());
                }
                Ok(())
            }
            Operation::CopyRows {
                from_table,
                to_table,
                columns,
                ..
            } => {
                require_name("table", from_table)?;
                require_name("table", to_table)?;
                if columns.is_empty() {
                    return Err("copy has no columns".to_string());
                }
                Ok(())
            }
            Operation::RegenerateAudit {
                table,
                columns,
                editor_column,
            } => {
                require_name("table", table)?;
                require_columns(columns)?;
                let mut seen = HashSet::new();
                for column in columns {
                    if RESERVED_COLUMNS.contains(&column.as_str()) {
                        return Err(format!(
                            "column '{}' clashes with an audit metadata column",
                            column
                        ));
                    }
                    if !seen.insert(column.as_str()) {
                        return Err(format!("audit column '{}' listed twice", column));
                    }
                }
                if let Some(editor) = editor_column {
                    require_name("editor column", editor)?;
                }
                Ok(())
            }
            Operation::RevertAudit { table } => require_name("table", table),
        }
    }
}

fn require_name(kind: &str, name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{} name is empty", kind));
    }
    Ok(())
}

fn require_columns(columns: &[String]) -> Result<(), String> {
    if columns.is_empty() {
        return Err("column list is empty".to_string());
    }
    for column in columns {
        require_name("column", column)?;
    }
    Ok(())
}

fn require_values(kind: &str, values: &RowValues) -> Result<(), String> {
    if values.is_empty() {
        return Err(format!("{} is empty", kind));
    }
    Ok(())
}

fn validate_column_refs(columns: &[ColumnRef]) -> Result<(), String> {
    if columns.is_empty() {
        return Err("column list is empty".to_string());
    }
    for column in columns {
        require_name("table", &column.table)?;
        require_name("column", &column.column)?;
    }
    Ok(())
}

fn validate_foreign_key(fk: &ForeignKeySpec) -> Result<(), String> {
    require_columns(&fk.columns)?;
    require_name("table", &fk.references_table)?;
    require_columns(&fk.references_columns)?;
    if fk.columns.len() != fk.references_columns.len() {
        return Err(format!(
            "foreign key has {} column(s) but references {}",
            fk.columns.len(),
            fk.references_columns.len()
        ));
    }
    Ok(())
}
