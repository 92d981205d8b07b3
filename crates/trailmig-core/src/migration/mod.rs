//! Migration engine.
//!
//! Applies an ordered set of reversible migration units to a SQLite database
//! and records every applied unit in a version ledger:
//! - Units hold declarative forward and backward scripts
//! - The ledger is always a contiguous prefix of the known units
//! - Each unit commits atomically together with its ledger entry
//! - A table-based lock serialises concurrent runners
//!
//! # Example
//!
//! ```no_run
//! use trailmig_core::migration::{load_dir, MigrationRunner, RollbackTarget};
//! use trailmig_core::RunnerConfig;
//!
//! let migrations = load_dir("migrations".as_ref())?;
//! let config = RunnerConfig::new("sqlite://app.db".parse()?);
//! let runner = MigrationRunner::open(config, migrations)?;
//!
//! let report = runner.apply(None)?;
//! println!("applied {} unit(s)", report.units.len());
//!
//! runner.rollback(RollbackTarget::Previous)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod executor;
pub mod id;
pub mod ledger;
pub mod lock;
pub mod operation;
pub mod runner;
pub mod source;
pub mod transform;
pub mod unit;

// Error types
pub use error::{LedgerViolation, MigrationError, OperationError};

// Unit model
pub use id::{InvalidMigrationId, MigrationId};
pub use operation::{
    CodeMapping, ColumnMapping, ColumnRef, ColumnSpec, ForeignKeySpec, Operation,
    ReferentialAction, RowValues,
};
pub use unit::{Direction, MigrationSet, MigrationUnit, Script};

// Ledger and lock
pub use ledger::{verify_ledger, Ledger, LedgerEntry};
pub use lock::{LedgerLock, LockGuard, LockHolder};

// Execution
pub use executor::{SchemaExecutor, ScriptSummary};
pub use runner::{MigrationRunner, PendingUnit, RollbackTarget, RunReport, StatusReport, UnitOutcome};
pub use source::{load_dir, load_file, write_template};
pub use transform::TransformError;
