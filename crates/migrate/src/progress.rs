//! Progress reporting
//!
//! The runner reports every migration the moment it is classified, so a failed
//! run still shows what happened before the failure point.

use std::sync::Mutex;

use tracing::{error, info};

use crate::fault::{render_fault, ExecutionFault};
use crate::migration::MigrationUnit;
use crate::outcome::SkipReason;
use crate::record::ExecutionRecord;

/// Message kinds attached to log events
pub mod kinds {
    pub const MIGRATION_SUCCEEDED: &str = "MigrationSucceeded";
    pub const MIGRATION_SKIPPED: &str = "MigrationSkipped";
    pub const MIGRATION_FAILED: &str = "MigrationFailed";
}

/// Observer of per-migration progress
pub trait ProgressSink: Send + Sync {
    fn succeeded(&self, unit: &MigrationUnit, record: &ExecutionRecord);

    fn skipped(&self, unit: &MigrationUnit, reason: SkipReason);

    fn failed(&self, unit: &MigrationUnit, fault: &ExecutionFault);
}

/// Reports progress as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn succeeded(&self, unit: &MigrationUnit, record: &ExecutionRecord) {
        info!(
            kind = kinds::MIGRATION_SUCCEEDED,
            title = unit.title(),
            file_name = unit.file_name(),
            description = unit.description().unwrap_or_default(),
            duration_ms = record.duration,
            "Migration {} successful",
            unit.display_name()
        );
    }

    fn skipped(&self, unit: &MigrationUnit, reason: SkipReason) {
        info!(
            kind = kinds::MIGRATION_SKIPPED,
            title = unit.title(),
            file_name = unit.file_name(),
            reason = %reason,
            "Migration {} skipped: {}",
            unit.display_name(),
            reason
        );
    }

    fn failed(&self, unit: &MigrationUnit, fault: &ExecutionFault) {
        let message = render_fault(fault);
        error!(
            kind = kinds::MIGRATION_FAILED,
            title = unit.title(),
            file_name = unit.file_name(),
            error = %message,
            "Migration {} failed. {}",
            unit.display_name(),
            message
        );
    }
}

/// Progress notification captured by [`CollectingProgressSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Succeeded {
        sequence_number: i64,
        file_name: String,
        duration: i64,
    },
    Skipped {
        sequence_number: i64,
        file_name: String,
        reason: SkipReason,
    },
    Failed {
        sequence_number: i64,
        file_name: String,
        error: String,
    },
}

impl ProgressEvent {
    pub fn sequence_number(&self) -> i64 {
        match self {
            ProgressEvent::Succeeded { sequence_number, .. }
            | ProgressEvent::Skipped { sequence_number, .. }
            | ProgressEvent::Failed { sequence_number, .. } => *sequence_number,
        }
    }
}

/// Keeps every notification in order, for diagnostics and tests
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressSink for CollectingProgressSink {
    fn succeeded(&self, unit: &MigrationUnit, record: &ExecutionRecord) {
        self.push(ProgressEvent::Succeeded {
            sequence_number: unit.sequence_number(),
            file_name: unit.file_name().to_string(),
            duration: record.duration,
        });
    }

    fn skipped(&self, unit: &MigrationUnit, reason: SkipReason) {
        self.push(ProgressEvent::Skipped {
            sequence_number: unit.sequence_number(),
            file_name: unit.file_name().to_string(),
            reason,
        });
    }

    fn failed(&self, unit: &MigrationUnit, fault: &ExecutionFault) {
        self.push(ProgressEvent::Failed {
            sequence_number: unit.sequence_number(),
            file_name: unit.file_name().to_string(),
            error: render_fault(fault),
        });
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<T> {
    fn succeeded(&self, unit: &MigrationUnit, record: &ExecutionRecord) {
        (**self).succeeded(unit, record)
    }

    fn skipped(&self, unit: &MigrationUnit, reason: SkipReason) {
        (**self).skipped(unit, reason)
    }

    fn failed(&self, unit: &MigrationUnit, fault: &ExecutionFault) {
        (**self).failed(unit, fault)
    }
}
