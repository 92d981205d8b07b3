//! Trigger-based audit trails.
//!
//! For each audited table the generator maintains a shadow table and one
//! capture trigger per mutation event. A shadow table is a *generation*: when
//! the captured shape changes, a new generation is created and the triggers
//! move to it, while older generations are kept with the rows they captured.
//!
//! | Event  | `operation_code` | Captured row |
//! |--------|------------------|--------------|
//! | insert | 1                | `NEW`        |
//! | update | 2                | `NEW`        |
//! | delete | 3                | `OLD`        |
//!
//! Deletes record the pre-state so the last known values of a removed row
//! survive in the trail.

pub mod catalog;
pub mod event;
pub mod generator;

pub use catalog::{AuditCatalog, AuditShadowTable, CapturedColumn};
pub use event::CaptureEvent;
pub use generator::{trigger_name, AuditTrailGenerator};

use thiserror::Error;

/// Shadow-row primary key column.
pub const SHADOW_ROW_ID_COLUMN: &str = "shadow_row_id";

/// Mutation code column.
pub const OPERATION_CODE_COLUMN: &str = "operation_code";

/// Capture timestamp column.
pub const CAPTURED_AT_COLUMN: &str = "captured_at";

/// Editor identity column.
pub const LAST_EDITOR_COLUMN: &str = "last_editor_id";

/// Metadata columns every shadow table carries; captured columns may not use these names.
pub const RESERVED_COLUMNS: [&str; 4] = [
    SHADOW_ROW_ID_COLUMN,
    OPERATION_CODE_COLUMN,
    CAPTURED_AT_COLUMN,
    LAST_EDITOR_COLUMN,
];

/// Audit trail errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The audited table does not exist.
    #[error("audited table '{table}' does not exist")]
    SourceTableMissing {
        /// Source table name.
        table: String,
    },

    /// A captured or editor column is not a column of the source table.
    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn {
        /// Source table name.
        table: String,
        /// Missing column.
        column: String,
    },

    /// A captured column collides with a metadata column.
    #[error("column '{column}' clashes with an audit metadata column")]
    ReservedColumn {
        /// Offending column.
        column: String,
    },

    /// Revert requested for a table with no active generation.
    #[error("table '{table}' has no active audit generation")]
    NoActiveGeneration {
        /// Source table name.
        table: String,
    },

    /// A catalog row could not be decoded.
    #[error("audit catalog entry for '{table}' is invalid: {reason}")]
    InvalidCatalog {
        /// Source table name.
        table: String,
        /// Decoding failure.
        reason: String,
    },
}
