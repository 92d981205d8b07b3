//! Migration-specific error types.

use super::id::MigrationId;
use super::unit::Direction;
use crate::audit::AuditError;
use crate::migration::transform::TransformError;
use std::path::PathBuf;
use thiserror::Error;

/// Ledger state that does not match the known migration sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerViolation {
    /// The ledger records an id that no known unit has.
    #[error("ledger records '{migration_id}', which is not a known migration")]
    UnknownMigration {
        /// The unknown id as stored in the ledger.
        migration_id: String,
    },

    /// The ledger skips a known unit that precedes an applied one.
    #[error("ledger records {applied} but not the earlier migration {missing}")]
    Gap {
        /// First known unit missing from the ledger.
        missing: MigrationId,
        /// Applied unit found in its place.
        applied: MigrationId,
    },
}

/// Failure of a single operation inside a script.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The database rejected a statement.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A data transformation failed.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// An audit trail operation failed.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// A seed row update or delete matched nothing.
    #[error("no row of '{table}' matches {key}")]
    SeedRowMissing {
        /// Target table.
        table: String,
        /// Rendered key predicate.
        key: String,
    },

    /// The table to rebuild does not exist.
    #[error("table '{table}' does not exist")]
    TableNotFound {
        /// Missing table.
        table: String,
    },

    /// No foreign key is defined on the given columns.
    #[error("table '{table}' has no foreign key on ({columns})")]
    ForeignKeyNotFound {
        /// Table searched.
        table: String,
        /// Comma separated column list.
        columns: String,
    },

    /// The stored table definition cannot be edited for a rebuild.
    #[error("cannot rebuild table '{table}': {reason}")]
    UnsupportedDefinition {
        /// Table being rebuilt.
        table: String,
        /// What could not be handled.
        reason: String,
    },

    /// A seed value cannot be written as a SQL literal.
    #[error("unsupported value for column '{column}': {value}")]
    UnsupportedValue {
        /// Column the value belongs to.
        column: String,
        /// The rejected JSON value.
        value: String,
    },
}

/// Migration errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Rollback requested past a unit without a backward script.
    #[error("migration {migration_id} has no backward script; the ledger cannot be rolled back past it")]
    MissingBackwardScript {
        /// The irreversible unit.
        migration_id: MigrationId,
    },

    /// An operation failed; the unit's transaction was rolled back.
    #[error("migration {migration_id} failed ({direction}) at operation {index} [{operation}]: {source}")]
    OperationFailed {
        /// Unit being executed.
        migration_id: MigrationId,
        /// Direction of the script.
        direction: Direction,
        /// Index of the failing operation within the script.
        index: usize,
        /// Description of the failing operation.
        operation: String,
        /// Underlying failure.
        source: OperationError,
    },

    /// Another runner holds the ledger lock.
    #[error("ledger lock is held by {}", .owner.as_deref().unwrap_or("another runner"))]
    LockContention {
        /// Recorded owner of the lock, when it could be read.
        owner: Option<String>,
    },

    /// The ledger does not form a prefix of the known sequence.
    #[error("ordering violation: {0}")]
    OrderingViolation(LedgerViolation),

    /// An applied unit's definition changed after it was applied.
    #[error("checksum mismatch for migration {migration_id}: ledger has {recorded}, definition hashes to {expected}")]
    ChecksumMismatch {
        /// The changed unit.
        migration_id: MigrationId,
        /// Checksum stored in the ledger.
        recorded: String,
        /// Checksum of the current definition.
        expected: String,
    },

    /// A requested target id is not a known unit.
    #[error("unknown migration: {migration_id}")]
    UnknownMigration {
        /// The requested id.
        migration_id: String,
    },

    /// A rollback target that is not currently applied.
    #[error("migration {migration_id} is not applied")]
    TargetNotApplied {
        /// The requested id.
        migration_id: MigrationId,
    },

    /// Two units share an id.
    #[error("duplicate migration id: {migration_id}")]
    DuplicateMigration {
        /// The duplicated id.
        migration_id: MigrationId,
    },

    /// A unit failed validation.
    #[error("invalid migration {migration_id}: {reason}")]
    InvalidUnit {
        /// The invalid unit.
        migration_id: MigrationId,
        /// What is wrong with it.
        reason: String,
    },

    /// A migration file could not be loaded.
    #[error("invalid migration file {}: {reason}", .path.display())]
    InvalidMigrationFile {
        /// Offending file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// Foreign key violations remained at the end of a unit.
    #[error("foreign key check failed after migration {migration_id}: {}", .violations.join("; "))]
    IntegrityCheckFailed {
        /// Unit whose transaction was rolled back.
        migration_id: MigrationId,
        /// One entry per violating row.
        violations: Vec<String>,
    },

    /// Ledger content is inconsistent with itself.
    #[error("ledger state corrupted: {message}")]
    StateCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Audit catalog error outside a script.
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

impl MigrationError {
    /// Stable name of the error kind, printed by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::MissingBackwardScript { .. } => "MissingBackwardScript",
            MigrationError::OperationFailed { .. } => "OperationFailed",
            MigrationError::LockContention { .. } => "LockContention",
            MigrationError::OrderingViolation(_) => "OrderingViolation",
            MigrationError::ChecksumMismatch { .. } => "ChecksumMismatch",
            MigrationError::UnknownMigration { .. } => "UnknownMigration",
            MigrationError::TargetNotApplied { .. } => "TargetNotApplied",
            MigrationError::DuplicateMigration { .. } => "DuplicateMigration",
            MigrationError::InvalidUnit { .. } => "InvalidUnit",
            MigrationError::InvalidMigrationFile { .. } => "InvalidMigrationFile",
            MigrationError::IntegrityCheckFailed { .. } => "IntegrityCheckFailed",
            MigrationError::StateCorrupted { .. } => "StateCorrupted",
            MigrationError::Audit(_) => "Audit",
            MigrationError::Storage(_) => "Storage",
        }
    }

    /// Whether the caller may retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationError::LockContention { .. })
    }
}

impl From<rusqlite::Error> for MigrationError {
    fn from(e: rusqlite::Error) -> Self {
        MigrationError::Storage(crate::error::Error::Database(e))
    }
}

impl From<LedgerViolation> for MigrationError {
    fn from(v: LedgerViolation) -> Self {
        MigrationError::OrderingViolation(v)
    }
}
