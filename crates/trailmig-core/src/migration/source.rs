//! Migration files on disk.
//!
//! One JSON document per unit, named `<id>_<name>.json`:
//!
//! ```json
//! {
//!   "id": "20240101120000",
//!   "name": "create apps",
//!   "forward": [{"op": "create_table", "table": "apps", "columns": [{"name": "id", "sql_type": "INTEGER"}]}],
//!   "backward": [{"op": "drop_table", "table": "apps"}]
//! }
//! ```
//!
//! A missing or `null` `backward` marks the unit irreversible.

use super::error::MigrationError;
use super::id::MigrationId;
use super::unit::{MigrationSet, MigrationUnit};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const EXTENSION: &str = "json";

fn io_error(e: std::io::Error) -> MigrationError {
    MigrationError::Storage(crate::error::Error::Io(e))
}

fn invalid(path: &Path, reason: impl Into<String>) -> MigrationError {
    MigrationError::InvalidMigrationFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Load one migration file.
pub fn load_file(path: &Path) -> Result<MigrationUnit, MigrationError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid(path, "file name is not valid UTF-8"))?;
    let prefix = stem.split('_').next().unwrap_or(stem);

    let text = fs::read_to_string(path).map_err(io_error)?;
    let unit: MigrationUnit =
        serde_json::from_str(&text).map_err(|e| invalid(path, e.to_string()))?;

    if unit.id.as_str() != prefix {
        return Err(invalid(
            path,
            format!("file name prefix '{}' does not match id '{}'", prefix, unit.id),
        ));
    }
    Ok(unit)
}

/// Load every `.json` unit in `dir`. Other files are ignored.
pub fn load_dir(dir: &Path) -> Result<MigrationSet, MigrationError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    let units = paths
        .iter()
        .map(|path| load_file(path))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(dir = %dir.display(), units = units.len(), "loaded migrations");
    MigrationSet::new(units)
}

fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

/// Write an empty reversible unit named `name`, with an id taken from `now`.
///
/// Returns the path of the new file.
pub fn write_template(
    dir: &Path,
    name: &str,
    now: DateTime<Utc>,
) -> Result<PathBuf, MigrationError> {
    let id = MigrationId::from_timestamp(now);
    let slug = slug(name);
    if slug.is_empty() {
        return Err(MigrationError::InvalidUnit {
            migration_id: id,
            reason: format!("name '{}' has no usable characters", name),
        });
    }

    fs::create_dir_all(dir).map_err(io_error)?;
    let path = dir.join(format!("{}_{}.{}", id, slug, EXTENSION));
    let unit = MigrationUnit::new(id, name.trim());
    let body = serde_json::to_string_pretty(&unit)
        .map_err(|e| crate::error::Error::Serialization(e.to_string()))?;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(io_error)?;
    file.write_all(body.as_bytes()).map_err(io_error)?;
    file.write_all(b"\n").map_err(io_error)?;
    Ok(path)
}
