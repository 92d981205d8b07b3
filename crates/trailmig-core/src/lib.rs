//! trailmig core - migration runner, version ledger, and audit trail generator.
//!
//! This crate applies versioned schema and data migrations to SQLite databases
//! and maintains trigger-based audit shadow tables across schema versions.

pub mod audit;
pub mod config;
pub mod error;
pub mod migration;
pub mod sql;

pub use audit::{AuditError, AuditShadowTable, AuditTrailGenerator, CaptureEvent};
pub use config::{AuditConfig, DatabaseUrl, RunnerConfig};
pub use error::Error;
pub use migration::{
    load_dir, Direction, MigrationError, MigrationId, MigrationRunner, MigrationSet,
    MigrationUnit, Operation, RollbackTarget, RunReport, StatusReport,
};
