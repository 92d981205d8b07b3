//! Migration units and the ordered set of known units.

use super::error::MigrationError;
use super::id::MigrationId;
use super::operation::Operation;
use serde::{Deserialize, Serialize};

/// Direction a script is executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Applying a unit.
    Forward,
    /// Rolling a unit back.
    Backward,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

/// An ordered list of operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script(Vec<Operation>);

impl Script {
    /// Create a script from operations.
    pub fn new(operations: Vec<Operation>) -> Self {
        Self(operations)
    }

    /// Operations in execution order.
    pub fn operations(&self) -> &[Operation] {
        &self.0
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the script has no operations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over operations in execution order.
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }
}

impl From<Vec<Operation>> for Script {
    fn from(operations: Vec<Operation>) -> Self {
        Self(operations)
    }
}

/// A versioned forward/backward schema transformation.
///
/// Units are immutable once authored. A unit without a backward script is
/// irreversible: the ledger cannot be rolled back past it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationUnit {
    /// Ordering key.
    pub id: MigrationId,
    /// Human readable name.
    pub name: String,
    /// Script run on apply.
    pub forward: Script,
    /// Script run on rollback.
    #[serde(default)]
    pub backward: Option<Script>,
}

#[derive(Serialize)]
struct ChecksumInput<'a> {
    id: &'a MigrationId,
    forward: &'a Script,
    backward: &'a Option<Script>,
}

impl MigrationUnit {
    /// Create an empty reversible unit.
    pub fn new(id: MigrationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            forward: Script::default(),
            backward: Some(Script::default()),
        }
    }

    /// Set the forward script.
    pub fn with_forward(mut self, operations: Vec<Operation>) -> Self {
        self.forward = Script::new(operations);
        self
    }

    /// Set the backward script.
    pub fn with_backward(mut self, operations: Vec<Operation>) -> Self {
        self.backward = Some(Script::new(operations));
        self
    }

    /// Mark the unit irreversible.
    pub fn irreversible(mut self) -> Self {
        self.backward = None;
        self
    }

    /// Check if the unit can be rolled back.
    pub fn is_reversible(&self) -> bool {
        self.backward.is_some()
    }

    /// Script for the given direction, if defined.
    pub fn script(&self, direction: Direction) -> Option<&Script> {
        match direction {
            Direction::Forward => Some(&self.forward),
            Direction::Backward => self.backward.as_ref(),
        }
    }

    /// Content checksum (blake3 over the canonical JSON of id and scripts).
    pub fn checksum(&self) -> Result<String, MigrationError> {
        let input = ChecksumInput {
            id: &self.id,
            forward: &self.forward,
            backward: &self.backward,
        };
        let bytes = serde_json::to_vec(&input)
            .map_err(|e| crate::error::Error::Serialization(e.to_string()))?;
        Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
    }

    /// Validate the unit's name and every operation of both scripts.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let invalid = |reason: String| MigrationError::InvalidUnit {
            migration_id: self.id.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }

        for direction in [Direction::Forward, Direction::Backward] {
            let Some(script) = self.script(direction) else {
                continue;
            };
            for (index, op) in script.iter().enumerate() {
                op.validate().map_err(|reason| {
                    invalid(format!("{} operation {}: {}", direction, index, reason))
                })?;
            }
        }
        Ok(())
    }
}

/// The globally known, totally ordered set of migration units.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    units: Vec<MigrationUnit>,
}

impl MigrationSet {
    /// Build a set, validating every unit and rejecting duplicate ids.
    pub fn new(mut units: Vec<MigrationUnit>) -> Result<Self, MigrationError> {
        units.sort_by(|a, b| a.id.cmp(&b.id));

        for pair in units.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(MigrationError::DuplicateMigration {
                    migration_id: pair[0].id.clone(),
                });
            }
        }
        for unit in &units {
            unit.validate()?;
        }

        Ok(Self { units })
    }

    /// Units in ascending id order.
    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Look up a unit by id.
    pub fn get(&self, id: &MigrationId) -> Option<&MigrationUnit> {
        self.position(id).map(|idx| &self.units[idx])
    }

    /// Position of a unit in the total order.
    pub fn position(&self, id: &MigrationId) -> Option<usize> {
        self.units.binary_search_by(|unit| unit.id.cmp(id)).ok()
    }

    /// Check if a unit with this id is known.
    pub fn contains(&self, id: &MigrationId) -> bool {
        self.position(id).is_some()
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &MigrationId> {
        self.units.iter().map(|unit| &unit.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::operation::ColumnSpec;

    fn id(s: &str) -> MigrationId {
        MigrationId::new(s).unwrap()
    }

    fn create_table_unit(unit_id: &str, table: &str) -> MigrationUnit {
        MigrationUnit::new(id(unit_id), format!("create {}", table))
            .with_forward(vec![Operation::CreateTable {
                table: table.into(),
                columns: vec![ColumnSpec::new("id", "INTEGER").not_null()],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
            }])
            .with_backward(vec![Operation::DropTable { table: table.into() }])
    }

    #[test]
    fn test_set_orders_units() {
        let set = MigrationSet::new(vec![
            create_table_unit("20240103000000", "c"),
            create_table_unit("20240101000000", "a"),
            create_table_unit("20240102000000", "b"),
        ])
        .unwrap();

        let ids: Vec<&str> = set.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["20240101000000", "20240102000000", "20240103000000"]);
        assert_eq!(set.position(&id("20240102000000")), Some(1));
        assert!(set.get(&id("20240104000000")).is_none());
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let result = MigrationSet::new(vec![
            create_table_unit("20240101000000", "a"),
            create_table_unit("20240101000000", "b"),
        ]);
        assert!(matches!(result, Err(MigrationError::DuplicateMigration { .. })));
    }

    #[test]
    fn test_set_validates_units() {
        let bad = MigrationUnit::new(id("20240101000000"), "bad")
            .with_forward(vec![Operation::RawStatement { sql: "  ".into() }]);
        let result = MigrationSet::new(vec![bad]);
        match result {
            Err(MigrationError::InvalidUnit { reason, .. }) => {
                assert!(reason.contains("forward operation 0"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_checksum_tracks_content() {
        let a = create_table_unit("20240101000000", "a");
        let same = create_table_unit("20240101000000", "a");
        let renamed = create_table_unit("20240101000000", "b");

        assert_eq!(a.checksum().unwrap(), same.checksum().unwrap());
        assert_ne!(a.checksum().unwrap(), renamed.checksum().unwrap());
        assert_eq!(a.checksum().unwrap().len(), 64);
    }

    #[test]
    fn test_irreversible_unit() {
        let unit = create_table_unit("20240101000000", "a").irreversible();
        assert!(!unit.is_reversible());
        assert!(unit.script(Direction::Backward).is_none());
        assert!(unit.script(Direction::Forward).is_some());
    }
}
