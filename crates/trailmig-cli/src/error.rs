//! CLI error type.

use thiserror::Error;
use trailmig_core::MigrationError;

/// Errors reported by the `migrate` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Migration engine error.
    #[error("{0}")]
    Migration(#[from] MigrationError),

    /// The command needs a database and none was given.
    #[error("no database given; pass --database or set DATABASE_URL")]
    MissingDatabase,
}

impl CliError {
    /// Kind printed as `error[<kind>]`.
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Migration(e) => e.kind(),
            CliError::MissingDatabase => "InvalidConfig",
        }
    }

    /// Process exit code: 2 for retryable failures, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Migration(e) if e.is_retryable() => 2,
            _ => 1,
        }
    }
}
