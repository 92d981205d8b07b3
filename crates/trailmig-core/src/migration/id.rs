//! Ordered migration identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Timestamp layout of generated identifiers (`YYYYMMDDHHMMSS`).
pub const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Identifier of a migration unit.
///
/// A non-empty run of ASCII digits, normally the UTC creation timestamp of the
/// unit. Identifiers compare numerically, so `"99"` sorts before `"100"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId(String);

impl MigrationId {
    /// Parse an identifier, rejecting anything that is not a run of digits.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidMigrationId> {
        let id = id.into();
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidMigrationId(id));
        }
        Ok(Self(id))
    }

    /// Generate an identifier from a creation timestamp.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts.format(ID_TIMESTAMP_FORMAT).to_string())
    }

    /// The textual form of the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn significant(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl Ord for MigrationId {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.significant(), other.significant());
        a.len()
            .cmp(&b.len())
            .then_with(|| a.cmp(b))
            .then_with(|| self.0.len().cmp(&other.0.len()))
    }
}

impl PartialOrd for MigrationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for MigrationId {
    type Err = InvalidMigrationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for MigrationId {
    type Error = InvalidMigrationId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.0
    }
}

impl std::fmt::Display for MigrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejected migration identifier text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid migration id '{0}': expected a run of digits")]
pub struct InvalidMigrationId(pub String);
