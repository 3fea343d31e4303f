//! Ordered migration catalog
//!
//! Sequence numbers are both the ordering key and the uniqueness domain: two
//! migrations claiming the same sequence number are rejected when the catalog
//! is built, never at run time.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{MigrationError, MigrationResult};
use crate::migration::MigrationUnit;

/// Migrations keyed and ordered by sequence number
#[derive(Debug, Clone, Default)]
pub struct MigrationCatalog {
    index: BTreeMap<i64, Arc<MigrationUnit>>,
}

impl MigrationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from units in any order
    pub fn from_units<I>(units: I) -> MigrationResult<Self>
    where
        I: IntoIterator<Item = MigrationUnit>,
    {
        let mut catalog = Self::new();
        for unit in units {
            catalog.add(unit)?;
        }
        Ok(catalog)
    }

    /// Insert a unit; fails if its sequence number is already taken
    pub fn add(&mut self, unit: MigrationUnit) -> MigrationResult<&mut Self> {
        let sequence_number = unit.sequence_number();
        if let Some(conflicting) = self.index.get(&sequence_number) {
            return Err(MigrationError::DuplicateSequence {
                sequence_number,
                file_name: unit.file_name().to_string(),
                conflicting: conflicting.file_name().to_string(),
            });
        }

        self.index.insert(sequence_number, Arc::new(unit));
        Ok(self)
    }

    pub fn get(&self, sequence_number: i64) -> Option<&Arc<MigrationUnit>> {
        self.index.get(&sequence_number)
    }

    /// Unit at a 0-based position in ascending order
    pub fn at(&self, ordinal: usize) -> Option<&Arc<MigrationUnit>> {
        self.index.values().nth(ordinal)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<MigrationUnit>> {
        self.index.values()
    }

    /// All units ascending by sequence number
    pub fn to_ordered_vec(&self) -> Vec<Arc<MigrationUnit>> {
        self.index.values().cloned().collect()
    }

    pub fn sequence_numbers(&self) -> Vec<i64> {
        self.index.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Move every unit of `other` into this catalog
    pub fn merge(&mut self, other: MigrationCatalog) -> MigrationResult<&mut Self> {
        for (sequence_number, unit) in other.index {
            if let Some(conflicting) = self.index.get(&sequence_number) {
                return Err(MigrationError::DuplicateSequence {
                    sequence_number,
                    file_name: unit.file_name().to_string(),
                    conflicting: conflicting.file_name().to_string(),
                });
            }
            self.index.insert(sequence_number, unit);
        }
        Ok(self)
    }
}
