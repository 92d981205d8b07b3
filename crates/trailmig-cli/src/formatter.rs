//! Output formatters for run and status reports.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use trailmig_core::migration::{Direction, LockHolder, MigrationId};
use trailmig_core::{RunReport, StatusReport};

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format the result of an apply or rollback.
    fn format_run_report(&self, report: &RunReport) -> String;

    /// Format ledger status.
    fn format_status(&self, status: &StatusReport) -> String;

    /// Format the result of a forced unlock.
    fn format_unlock(&self, previous: Option<&LockHolder>) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

fn current_label(current: Option<&MigrationId>) -> String {
    current
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_run_report(&self, report: &RunReport) -> String {
        let current = current_label(report.current.as_ref());
        if report.up_to_date {
            return match report.direction {
                Direction::Forward => format!("Already up to date (current: {})", current),
                Direction::Backward => format!("Nothing to roll back (current: {})", current),
            };
        }

        let mut table = Table::new();
        table.set_header(vec![
            "Migration",
            "Name",
            "Direction",
            "Operations",
            "Statements",
            "Duration (ms)",
        ]);
        for unit in &report.units {
            table.add_row(vec![
                Cell::new(&unit.migration_id),
                Cell::new(&unit.name),
                Cell::new(unit.direction),
                Cell::new(unit.operations),
                Cell::new(unit.statements.len()),
                Cell::new(unit.duration_ms),
            ]);
        }

        let verb = match report.direction {
            Direction::Forward => "applied",
            Direction::Backward => "rolled back",
        };
        let mut output = format!(
            "{}\n{} migration(s) {} (current: {})",
            table,
            report.units.len(),
            verb,
            current
        );

        if report.dry_run {
            output.push_str("\n\nDry run, nothing was committed. Statements:\n");
            for statement in report.statements() {
                output.push_str(statement);
                output.push_str(";\n");
            }
        }
        output
    }

    fn format_status(&self, status: &StatusReport) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Migration", "Name", "State", "Applied at"]);

        for entry in &status.applied {
            table.add_row(vec![
                Cell::new(&entry.migration_id),
                Cell::new(&entry.name),
                Cell::new("applied"),
                Cell::new(entry.applied_at.format("%Y-%m-%d %H:%M:%S UTC")),
            ]);
        }
        for unit in &status.pending {
            let state = if unit.reversible {
                "pending"
            } else {
                "pending (irreversible)"
            };
            table.add_row(vec![
                Cell::new(&unit.migration_id),
                Cell::new(&unit.name),
                Cell::new(state),
                Cell::new(""),
            ]);
        }

        let mut output = format!(
            "{}\ncurrent: {}, {} applied, {} pending",
            table,
            current_label(status.current.as_ref()),
            status.applied.len(),
            status.pending.len()
        );
        if let Some(holder) = &status.lock_holder {
            output.push_str(&format!(
                "\nlocked by {} since {}",
                holder.owner,
                holder.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        output
    }

    fn format_unlock(&self, previous: Option<&LockHolder>) -> String {
        match previous {
            Some(holder) => format!("Released lock held by {}", holder.owner),
            None => "Ledger was not locked".to_string(),
        }
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_run_report(&self, report: &RunReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|e| error_json(&e))
    }

    fn format_status(&self, status: &StatusReport) -> String {
        serde_json::to_string_pretty(status).unwrap_or_else(|e| error_json(&e))
    }

    fn format_unlock(&self, previous: Option<&LockHolder>) -> String {
        serde_json::json!({ "released": previous }).to_string()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}

fn error_json(error: &serde_json::Error) -> String {
    serde_json::json!({ "error": error.to_string() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use trailmig_core::migration::{LedgerEntry, PendingUnit};

    fn status() -> StatusReport {
        StatusReport {
            current: Some(MigrationId::new("20240101000000").unwrap()),
            applied: vec![LedgerEntry {
                migration_id: "20240101000000".into(),
                name: "create apps".into(),
                checksum: Some("ab12".into()),
                applied_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            }],
            pending: vec![PendingUnit {
                migration_id: MigrationId::new("20240102000000").unwrap(),
                name: "drop notes".into(),
                reversible: false,
            }],
            lock_holder: None,
        }
    }

    #[test]
    fn test_table_status() {
        let output = TableFormatter.format_status(&status());
        assert!(output.contains("create apps"));
        assert!(output.contains("2024-01-02 03:04:05 UTC"));
        assert!(output.contains("pending (irreversible)"));
        assert!(output.contains("current: 20240101000000, 1 applied, 1 pending"));
        assert!(!output.contains("locked by"));
    }

    #[test]
    fn test_json_status() {
        let output = JsonFormatter.format_status(&status());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["current"], "20240101000000");
        assert_eq!(value["applied"][0]["name"], "create apps");
        assert_eq!(value["pending"][0]["reversible"], false);
        assert!(value["lock_holder"].is_null());
    }

    #[test]
    fn test_up_to_date_report() {
        let report = RunReport {
            direction: Direction::Backward,
            units: vec![],
            up_to_date: true,
            dry_run: false,
            current: None,
        };
        assert_eq!(
            TableFormatter.format_run_report(&report),
            "Nothing to roll back (current: none)"
        );
        let value: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_run_report(&report)).unwrap();
        assert_eq!(value["direction"], "backward");
        assert_eq!(value["up_to_date"], true);
    }
}
