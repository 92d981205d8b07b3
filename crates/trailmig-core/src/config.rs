//! Runner configuration.

use crate::error::Error;
use rusqlite::Connection;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Prefix shared by every table the engine owns.
pub const ENGINE_TABLE_PREFIX: &str = "__trailmig_";

/// Default name of the version ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "__trailmig_ledger";

/// Default name of the ledger lock table.
pub const DEFAULT_LOCK_TABLE: &str = "__trailmig_lock";

/// Default name of the audit shadow-table catalog.
pub const DEFAULT_AUDIT_CATALOG_TABLE: &str = "__trailmig_audit_catalog";

/// Default prefix for generated shadow tables.
pub const DEFAULT_SHADOW_PREFIX: &str = "audit_";

/// Default time to wait on a busy database, in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Location of the target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// Private in-memory database.
    Memory,
    /// Database file on disk.
    File(PathBuf),
}

impl DatabaseUrl {
    /// Open a connection to the database.
    pub fn open(&self) -> Result<Connection, Error> {
        let conn = match self {
            DatabaseUrl::Memory => Connection::open_in_memory()?,
            DatabaseUrl::File(path) => Connection::open(path)?,
        };
        Ok(conn)
    }
}

impl FromStr for DatabaseUrl {
    type Err = Error;

    /// Accepts `sqlite::memory:`, `:memory:`, `sqlite://<path>`, `sqlite:<path>`
    /// or a bare filesystem path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidConfig("database url is empty".to_string()));
        }
        if s == ":memory:" || s == "sqlite::memory:" || s == "sqlite://:memory:" {
            return Ok(DatabaseUrl::Memory);
        }
        if let Some(path) = s.strip_prefix("sqlite://").or_else(|| s.strip_prefix("sqlite:")) {
            if path.is_empty() {
                return Err(Error::InvalidConfig(format!("database url '{}' has no path", s)));
            }
            return Ok(DatabaseUrl::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = s.split_once("://") {
            return Err(Error::InvalidConfig(format!(
                "unsupported database scheme '{}'",
                scheme
            )));
        }
        Ok(DatabaseUrl::File(PathBuf::from(s)))
    }
}

impl std::fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseUrl::Memory => write!(f, "sqlite::memory:"),
            DatabaseUrl::File(path) => write!(f, "sqlite://{}", path.display()),
        }
    }
}

/// Audit trail generator configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Table recording every shadow-table generation.
    pub catalog_table: String,
    /// Prefix for generated shadow tables.
    pub shadow_prefix: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            catalog_table: DEFAULT_AUDIT_CATALOG_TABLE.to_string(),
            shadow_prefix: DEFAULT_SHADOW_PREFIX.to_string(),
        }
    }
}

/// Migration runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Target database.
    pub database: DatabaseUrl,

    /// Version ledger table name.
    pub ledger_table: String,

    /// Ledger lock table name.
    pub lock_table: String,

    /// Identity recorded in the lock row while this runner holds it.
    pub lock_owner: String,

    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,

    /// Whether recorded checksums must match the known migration definitions.
    pub verify_checksums: bool,

    /// Whether to run `PRAGMA foreign_key_check` before committing each unit.
    pub check_foreign_keys: bool,

    /// Execute the run and roll everything back instead of committing.
    pub dry_run: bool,

    /// Audit trail generator settings.
    pub audit: AuditConfig,
}

impl RunnerConfig {
    /// Create a configuration for the given database with default settings.
    pub fn new(database: DatabaseUrl) -> Self {
        Self {
            database,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
            lock_owner: default_lock_owner(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            verify_checksums: true,
            check_foreign_keys: true,
            dry_run: false,
            audit: AuditConfig::default(),
        }
    }

    /// Configuration for a private in-memory database.
    pub fn in_memory() -> Self {
        Self::new(DatabaseUrl::Memory)
    }

    /// Set the ledger table name.
    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }

    /// Set the lock table name.
    pub fn with_lock_table(mut self, table: impl Into<String>) -> Self {
        self.lock_table = table.into();
        self
    }

    /// Set the lock owner identity.
    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = owner.into();
        self
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Enable or disable checksum verification.
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Enable or disable the foreign key check after each unit.
    pub fn with_check_foreign_keys(mut self, check: bool) -> Self {
        self.check_foreign_keys = check;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the audit trail generator settings.
    pub fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }
}

fn default_lock_owner() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}:{}", host, std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_urls() {
        assert_eq!("sqlite::memory:".parse::<DatabaseUrl>().unwrap(), DatabaseUrl::Memory);
        assert_eq!(":memory:".parse::<DatabaseUrl>().unwrap(), DatabaseUrl::Memory);
    }

    #[test]
    fn test_parse_file_urls() {
        assert_eq!(
            "sqlite:///var/lib/app.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::File(PathBuf::from("/var/lib/app.db"))
        );
        assert_eq!(
            "sqlite:data/app.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::File(PathBuf::from("data/app.db"))
        );
        assert_eq!(
            "app.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::File(PathBuf::from("app.db"))
        );
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let err = "postgres://localhost/app".parse::<DatabaseUrl>().unwrap_err();
        assert!(err.to_string().contains("postgres"));
        assert!("".parse::<DatabaseUrl>().is_err());
        assert!("sqlite://".parse::<DatabaseUrl>().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = RunnerConfig::in_memory()
            .with_ledger_table("ledger")
            .with_lock_owner("replica-1")
            .with_dry_run(true);

        assert_eq!(config.ledger_table, "ledger");
        assert_eq!(config.lock_table, DEFAULT_LOCK_TABLE);
        assert_eq!(config.lock_owner, "replica-1");
        assert!(config.dry_run);
        assert!(config.verify_checksums);
        assert_eq!(config.audit.shadow_prefix, DEFAULT_SHADOW_PREFIX);
    }
}
