//! History records
//!
//! [`HistoryRecord`] is a row of the catalog table. [`ExecutionRecord`] is what
//! the runner produces for each migration it executed during a run; it becomes a
//! history row once the run commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::migration::{Direction, MigrationUnit};

/// Migration execution stored in the catalog table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub sequence_number: i64,
    pub file_name: String,
    pub direction: Direction,
    pub description: Option<String>,
    /// Execution time in milliseconds
    pub duration: i64,
    pub created_at: DateTime<Utc>,
}

/// Result of executing one migration in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub sequence_number: i64,
    pub file_name: String,
    pub direction: Direction,
    pub description: Option<String>,
    /// Execution time in milliseconds
    pub duration: i64,
}

impl ExecutionRecord {
    pub fn new(unit: &MigrationUnit, direction: Direction, duration: std::time::Duration) -> Self {
        Self {
            sequence_number: unit.sequence_number(),
            file_name: unit.file_name().to_string(),
            direction,
            description: unit.description().map(str::to_string),
            duration: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Turn into a history row stamped with `created_at`
    pub fn into_history(self, created_at: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            sequence_number: self.sequence_number,
            file_name: self.file_name,
            direction: self.direction,
            description: self.description,
            duration: self.duration,
            created_at,
        }
    }
}
