//! Subcommand execution.

use crate::error::CliError;
use crate::formatter::{create_formatter, Formatter};
use crate::{Args, Command};
use chrono::Utc;
use std::path::Path;
use trailmig_core::migration::{load_dir, write_template};
use trailmig_core::{DatabaseUrl, MigrationRunner, RollbackTarget, RunnerConfig};

/// Run the parsed command and return its rendered output.
pub fn run(args: Args) -> Result<String, CliError> {
    let formatter = create_formatter(args.format);

    match args.command {
        Command::Apply { to, dry_run } => {
            let runner = open_runner(args.database, &args.migrations, dry_run)?;
            let report = runner.apply(to.as_ref())?;
            Ok(formatter.format_run_report(&report))
        }
        Command::Rollback { to, all, dry_run } => {
            let target = match (to, all) {
                (Some(id), _) => RollbackTarget::To(id),
                (None, true) => RollbackTarget::Initial,
                (None, false) => RollbackTarget::Previous,
            };
            let runner = open_runner(args.database, &args.migrations, dry_run)?;
            let report = runner.rollback(target)?;
            Ok(formatter.format_run_report(&report))
        }
        Command::Status => {
            let runner = open_runner(args.database, &args.migrations, false)?;
            Ok(formatter.format_status(&runner.status()?))
        }
        Command::Unlock => {
            let runner = open_runner(args.database, &args.migrations, false)?;
            let previous = runner.force_unlock()?;
            Ok(formatter.format_unlock(previous.as_ref()))
        }
        Command::New { name } => new_migration(&args.migrations, &name, &*formatter),
    }
}

fn open_runner(
    database: Option<DatabaseUrl>,
    migrations: &Path,
    dry_run: bool,
) -> Result<MigrationRunner, CliError> {
    let database = database.ok_or(CliError::MissingDatabase)?;
    let set = load_dir(migrations)?;
    tracing::debug!(
        database = %database,
        migrations = %migrations.display(),
        units = set.len(),
        "opening runner"
    );

    let config = RunnerConfig::new(database).with_dry_run(dry_run);
    Ok(MigrationRunner::open(config, set)?)
}

fn new_migration(dir: &Path, name: &str, formatter: &dyn Formatter) -> Result<String, CliError> {
    let path = write_template(dir, name, Utc::now())?;
    tracing::info!(path = %path.display(), "migration created");
    Ok(formatter.format_message(&format!("Created {}", path.display())))
}
