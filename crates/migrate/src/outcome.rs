//! Outcome of a migration run

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::fault::ExecutionFault;
use crate::migration::{Direction, MigrationUnit};
use crate::record::ExecutionRecord;

/// Why a migration was not executed in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The unit has no action for the run's direction
    MissingAction(Direction),
    /// Applying, and the unit is at or below the latest applied sequence number
    AlreadyExecuted,
    /// Reverting, and the unit is above the latest applied sequence number
    NeverApplied,
    /// The unit lies beyond the run's target
    OutOfRange,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingAction(Direction::Apply) => f.write_str("no apply action"),
            SkipReason::MissingAction(Direction::Revert) => f.write_str("no revert action"),
            SkipReason::AlreadyExecuted => f.write_str("already executed"),
            SkipReason::NeverApplied => f.write_str("never applied"),
            SkipReason::OutOfRange => f.write_str("out of range"),
        }
    }
}

/// Classification of a unit within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Executed,
    Skipped,
    Failed,
    Unknown,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            UnitStatus::Executed => "executed",
            UnitStatus::Skipped => "skipped",
            UnitStatus::Failed => "failed",
            UnitStatus::Unknown => "unknown",
        };
        f.write_str(status)
    }
}

/// Executed, skipped and failed migrations of one run.
///
/// A unit appears in exactly one of the three lists.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub direction: Direction,
    /// Latest applied sequence number when the run started
    pub from: i64,
    /// Resolved target, `None` when unbounded
    pub to: Option<i64>,
    pub executed: Vec<Arc<MigrationUnit>>,
    pub skipped: Vec<Arc<MigrationUnit>>,
    pub failed: Vec<Arc<MigrationUnit>>,
    /// Fault raised by the failed unit
    pub error: Option<ExecutionFault>,
    /// Time spent in the failed unit before it raised
    pub failed_duration: Option<Duration>,
    /// Wall time of the whole run
    pub duration: Duration,
    records: Vec<ExecutionRecord>,
    skip_reasons: BTreeMap<i64, SkipReason>,
}

impl RunOutcome {
    pub fn new(direction: Direction, from: i64, to: Option<i64>) -> Self {
        Self {
            direction,
            from,
            to,
            executed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            error: None,
            failed_duration: None,
            duration: Duration::ZERO,
            records: Vec::new(),
            skip_reasons: BTreeMap::new(),
        }
    }

    pub(crate) fn record_executed(&mut self, unit: Arc<MigrationUnit>, record: ExecutionRecord) {
        self.executed.push(unit);
        self.records.push(record);
    }

    pub(crate) fn record_skipped(&mut self, unit: Arc<MigrationUnit>, reason: SkipReason) {
        self.skip_reasons.insert(unit.sequence_number(), reason);
        self.skipped.push(unit);
    }

    pub(crate) fn set_failed(
        &mut self,
        unit: Arc<MigrationUnit>,
        fault: ExecutionFault,
        elapsed: Duration,
    ) {
        self.failed.push(unit);
        self.error = Some(fault);
        self.failed_duration = Some(elapsed);
    }

    /// Execution records of the executed units, in execution order
    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn skip_reason(&self, sequence_number: i64) -> Option<SkipReason> {
        self.skip_reasons.get(&sequence_number).copied()
    }

    /// Executed, then skipped, then failed units
    pub fn all_units(&self) -> Vec<Arc<MigrationUnit>> {
        self.executed
            .iter()
            .chain(self.skipped.iter())
            .chain(self.failed.iter())
            .cloned()
            .collect()
    }

    pub fn status_of(&self, unit: &MigrationUnit) -> UnitStatus {
        let matches = |candidate: &Arc<MigrationUnit>| {
            candidate.sequence_number() == unit.sequence_number()
                && candidate.file_name() == unit.file_name()
        };

        if self.executed.iter().any(matches) {
            UnitStatus::Executed
        } else if self.skipped.iter().any(matches) {
            UnitStatus::Skipped
        } else if self.failed.iter().any(matches) {
            UnitStatus::Failed
        } else {
            UnitStatus::Unknown
        }
    }

    /// Longest file name among all units, 0 for an empty run
    pub fn max_file_name_length(&self) -> usize {
        self.executed
            .iter()
            .chain(self.skipped.iter())
            .chain(self.failed.iter())
            .map(|unit| unit.file_name().len())
            .max()
            .unwrap_or(0)
    }

    pub fn executed_sequence_numbers(&self) -> Vec<i64> {
        sorted_sequence_numbers(&self.executed)
    }

    pub fn skipped_sequence_numbers(&self) -> Vec<i64> {
        sorted_sequence_numbers(&self.skipped)
    }

    pub fn is_failed(&self) -> bool {
        !self.failed.is_empty()
    }
}

fn sorted_sequence_numbers(units: &[Arc<MigrationUnit>]) -> Vec<i64> {
    let mut numbers: Vec<i64> = units.iter().map(|u| u.sequence_number()).collect();
    numbers.sort_unstable();
    numbers
}
