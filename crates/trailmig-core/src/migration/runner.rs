//! Migration runner - the entry point for apply, rollback, and status.
//!
//! Every call takes the ledger lock, verifies the ledger against the known
//! units, and then executes each unit in its own transaction together with
//! its ledger update. A failing unit rolls back alone; units committed before
//! it stay committed.

use super::error::MigrationError;
use super::executor::SchemaExecutor;
use super::id::MigrationId;
use super::ledger::{verify_ledger, Ledger, LedgerEntry};
use super::lock::{LedgerLock, LockHolder};
use super::unit::{Direction, MigrationSet, MigrationUnit};
use crate::audit::{AuditShadowTable, AuditTrailGenerator};
use crate::config::RunnerConfig;
use crate::sql::Session;
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

/// How far a rollback goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// Undo the newest applied unit.
    Previous,
    /// Undo every unit newer than the given one, which stays applied.
    To(MigrationId),
    /// Undo every applied unit.
    Initial,
}

/// One unit executed by a run.
#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    /// Unit id.
    pub migration_id: MigrationId,
    /// Unit name.
    pub name: String,
    /// Script direction.
    pub direction: Direction,
    /// Operations executed.
    pub operations: usize,
    /// SQL statements issued, ledger update included.
    pub statements: Vec<String>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

/// Result of an apply or rollback call.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Direction of the run.
    pub direction: Direction,
    /// Units executed, in execution order.
    pub units: Vec<UnitOutcome>,
    /// Nothing needed to run.
    pub up_to_date: bool,
    /// The run was rolled back instead of committed.
    pub dry_run: bool,
    /// Newest applied unit after the run (as it would be, for a dry run).
    pub current: Option<MigrationId>,
}

impl RunReport {
    fn up_to_date(direction: Direction, dry_run: bool, current: Option<MigrationId>) -> Self {
        Self {
            direction,
            units: Vec::new(),
            up_to_date: true,
            dry_run,
            current,
        }
    }

    /// Every statement of the run in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.units
            .iter()
            .flat_map(|unit| unit.statements.iter().map(String::as_str))
    }
}

/// A known unit that is not applied.
#[derive(Debug, Clone, Serialize)]
pub struct PendingUnit {
    /// Unit id.
    pub migration_id: MigrationId,
    /// Unit name.
    pub name: String,
    /// Whether the unit has a backward script.
    pub reversible: bool,
}

/// Ledger state relative to the known units.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Newest applied unit.
    pub current: Option<MigrationId>,
    /// Ledger entries in id order.
    pub applied: Vec<LedgerEntry>,
    /// Known units not yet applied, in apply order.
    pub pending: Vec<PendingUnit>,
    /// Current lock holder, if any.
    pub lock_holder: Option<LockHolder>,
}

/// Applies and rolls back migration units against one database.
pub struct MigrationRunner {
    conn: Connection,
    migrations: MigrationSet,
    config: RunnerConfig,
    ledger: Ledger,
    lock: LedgerLock,
    executor: SchemaExecutor,
}

impl MigrationRunner {
    /// Open the configured database.
    pub fn open(config: RunnerConfig, migrations: MigrationSet) -> Result<Self, MigrationError> {
        let conn = config.database.open()?;
        Self::with_connection(conn, migrations, config)
    }

    /// Run against an existing connection.
    ///
    /// Sets the busy timeout, turns foreign key enforcement off for the
    /// connection, and creates the engine tables when missing.
    pub fn with_connection(
        conn: Connection,
        migrations: MigrationSet,
        config: RunnerConfig,
    ) -> Result<Self, MigrationError> {
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", false)?;

        let ledger = Ledger::new(config.ledger_table.clone());
        let lock = LedgerLock::new(config.lock_table.clone(), config.lock_owner.clone());
        let executor = SchemaExecutor::new(
            AuditTrailGenerator::new(&config.audit),
            config.check_foreign_keys,
        );

        ledger.ensure_table(&conn)?;
        lock.ensure_table(&conn)?;
        executor.audit().ensure_catalog(&conn)?;

        Ok(Self {
            conn,
            migrations,
            config,
            ledger,
            lock,
            executor,
        })
    }

    /// Apply pending units up to and including `target` (all when `None`).
    pub fn apply(&self, target: Option<&MigrationId>) -> Result<RunReport, MigrationError> {
        let end = match target {
            Some(id) => self.position(id)? + 1,
            None => self.migrations.len(),
        };

        let guard = self.lock.acquire(&self.conn)?;
        let applied = self.applied_count()?;
        let units = self.migrations.units();

        if end <= applied {
            info!(current = ?self.current_at(applied), "migrations up to date");
            guard.release()?;
            return Ok(RunReport::up_to_date(
                Direction::Forward,
                self.config.dry_run,
                self.current_at(applied),
            ));
        }

        let pending: Vec<&MigrationUnit> = units[applied..end].iter().collect();
        let outcomes = self.run(Direction::Forward, &pending)?;
        guard.release()?;

        Ok(RunReport {
            direction: Direction::Forward,
            units: outcomes,
            up_to_date: false,
            dry_run: self.config.dry_run,
            current: self.current_at(end),
        })
    }

    /// Roll applied units back, newest first.
    ///
    /// Every unit to undo must have a backward script; otherwise nothing runs.
    pub fn rollback(&self, target: RollbackTarget) -> Result<RunReport, MigrationError> {
        let target_position = match &target {
            RollbackTarget::To(id) => Some(self.position(id)?),
            _ => None,
        };

        let guard = self.lock.acquire(&self.conn)?;
        let applied = self.applied_count()?;
        let keep = match (&target, target_position) {
            (RollbackTarget::To(id), Some(position)) => {
                if position >= applied {
                    return Err(MigrationError::TargetNotApplied {
                        migration_id: id.clone(),
                    });
                }
                position + 1
            }
            (RollbackTarget::Initial, _) => 0,
            _ => applied.saturating_sub(1),
        };

        if keep >= applied {
            info!(current = ?self.current_at(applied), "nothing to roll back");
            guard.release()?;
            return Ok(RunReport::up_to_date(
                Direction::Backward,
                self.config.dry_run,
                self.current_at(applied),
            ));
        }

        let undo: Vec<&MigrationUnit> = self.migrations.units()[keep..applied].iter().rev().collect();
        if let Some(unit) = undo.iter().find(|unit| !unit.is_reversible()) {
            return Err(MigrationError::MissingBackwardScript {
                migration_id: unit.id.clone(),
            });
        }

        let outcomes = self.run(Direction::Backward, &undo)?;
        guard.release()?;

        Ok(RunReport {
            direction: Direction::Backward,
            units: outcomes,
            up_to_date: false,
            dry_run: self.config.dry_run,
            current: self.current_at(keep),
        })
    }

    /// Report applied and pending units.
    pub fn status(&self) -> Result<StatusReport, MigrationError> {
        let entries = self.ledger.entries(&self.conn)?;
        let applied = verify_ledger(&entries, &self.migrations, self.config.verify_checksums)?;

        let mut entries = entries;
        entries.sort_by_cached_key(|entry| MigrationId::new(entry.migration_id.as_str()).ok());

        let pending = self.migrations.units()[applied..]
            .iter()
            .map(|unit| PendingUnit {
                migration_id: unit.id.clone(),
                name: unit.name.clone(),
                reversible: unit.is_reversible(),
            })
            .collect();

        Ok(StatusReport {
            current: self.current_at(applied),
            applied: entries,
            pending,
            lock_holder: self.lock.holder(&self.conn)?,
        })
    }

    /// Clear a lock left behind by a crashed runner. Returns the previous holder.
    pub fn force_unlock(&self) -> Result<Option<LockHolder>, MigrationError> {
        self.lock.force_release(&self.conn)
    }

    /// Current holder of the ledger lock.
    pub fn lock_holder(&self) -> Result<Option<LockHolder>, MigrationError> {
        self.lock.holder(&self.conn)
    }

    /// Every audit shadow-table generation of `source`.
    pub fn shadow_tables(&self, source: &str) -> Result<Vec<AuditShadowTable>, MigrationError> {
        Ok(self.executor.audit().shadow_tables(&self.conn, source)?)
    }

    /// The migration connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Known units.
    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// Runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn position(&self, id: &MigrationId) -> Result<usize, MigrationError> {
        self.migrations
            .position(id)
            .ok_or_else(|| MigrationError::UnknownMigration {
                migration_id: id.to_string(),
            })
    }

    fn applied_count(&self) -> Result<usize, MigrationError> {
        let entries = self.ledger.entries(&self.conn)?;
        verify_ledger(&entries, &self.migrations, self.config.verify_checksums)
    }

    fn current_at(&self, applied: usize) -> Option<MigrationId> {
        applied
            .checked_sub(1)
            .map(|last| self.migrations.units()[last].id.clone())
    }

    fn run(
        &self,
        direction: Direction,
        units: &[&MigrationUnit],
    ) -> Result<Vec<UnitOutcome>, MigrationError> {
        let mut outcomes = Vec::with_capacity(units.len());

        if self.config.dry_run {
            let outer = self.conn.unchecked_transaction()?;
            for unit in units {
                outcomes.push(self.run_unit(&outer, unit, direction)?);
            }
            outer.rollback()?;
            info!(%direction, units = outcomes.len(), "dry run rolled back");
            return Ok(outcomes);
        }

        for unit in units {
            let tx = self.conn.unchecked_transaction()?;
            let outcome = self.run_unit(&tx, unit, direction)?;
            tx.commit()?;
            info!(
                migration_id = %unit.id,
                name = %unit.name,
                %direction,
                duration_ms = outcome.duration_ms,
                "migration committed"
            );
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn run_unit(
        &self,
        conn: &Connection,
        unit: &MigrationUnit,
        direction: Direction,
    ) -> Result<UnitOutcome, MigrationError> {
        let script = unit
            .script(direction)
            .ok_or_else(|| MigrationError::MissingBackwardScript {
                migration_id: unit.id.clone(),
            })?;

        info!(
            migration_id = %unit.id,
            name = %unit.name,
            %direction,
            operations = script.len(),
            "running migration"
        );

        let mut session = Session::new(conn);
        let summary = self
            .executor
            .execute(&mut session, &unit.id, script, direction)?;
        match direction {
            Direction::Forward => {
                self.ledger.append(&mut session, unit, Utc::now())?;
            }
            Direction::Backward => self.ledger.remove(&mut session, &unit.id)?,
        }

        Ok(UnitOutcome {
            migration_id: unit.id.clone(),
            name: unit.name.clone(),
            direction,
            operations: summary.operations,
            statements: session.into_statements(),
            duration_ms: summary.duration.as_millis() as u64,
        })
    }
}
