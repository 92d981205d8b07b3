//! trailmig command-line client
//!
//! Applies, rolls back, and inspects migration units stored as JSON files.

mod commands;
mod error;
mod formatter;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use std::path::PathBuf;
use trailmig_core::migration::MigrationId;
use trailmig_core::DatabaseUrl;

/// trailmig migration runner
#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(version, about = "Schema migrations with a version ledger and audit trails")]
pub struct Args {
    /// Target database (sqlite://path, sqlite::memory: or a bare path)
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database: Option<DatabaseUrl>,

    /// Directory holding migration files
    #[arg(long, global = true, env = "TRAILMIG_MIGRATIONS", default_value = "migrations")]
    pub migrations: PathBuf,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply pending migrations
    Apply {
        /// Stop after this migration
        #[arg(long)]
        to: Option<MigrationId>,

        /// Run everything, then roll it back
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back applied migrations (the newest one by default)
    Rollback {
        /// Keep this migration applied and undo everything newer
        #[arg(long, conflicts_with = "all")]
        to: Option<MigrationId>,

        /// Undo every applied migration
        #[arg(long)]
        all: bool,

        /// Run everything, then roll it back
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied and pending migrations
    Status,

    /// Clear a ledger lock left by a crashed runner
    Unlock,

    /// Create an empty migration file
    New {
        /// Migration name
        name: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trailmig=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match commands::run(args) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("error[{}]: {}", e.kind(), e);
            std::process::exit(e.exit_code());
        }
    }
}
