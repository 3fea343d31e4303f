//! Error types for the migration runner
//!
//! Catalog construction errors (`Format`, `InvalidUnit`, `DuplicateSequence`)
//! surface before a run starts. Inside a run, persistence and lock failures are
//! returned as plain failures while `Execution` carries the fault raised by a
//! migration action together with the partial outcome of the run.

use crate::config::ConfigError;
use crate::fault::ExecutionFault;
use crate::outcome::RunOutcome;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Persistence operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceOperation {
    Connect,
    EnsureTable,
    LatestSequence,
    ListHistory,
    FindRecord,
    AppendHistory,
    Statement,
    Begin,
    Commit,
    Rollback,
}

impl PersistenceOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceOperation::Connect => "connect",
            PersistenceOperation::EnsureTable => "ensure catalog table",
            PersistenceOperation::LatestSequence => "find latest sequence number",
            PersistenceOperation::ListHistory => "list history",
            PersistenceOperation::FindRecord => "find history record",
            PersistenceOperation::AppendHistory => "append history",
            PersistenceOperation::Statement => "execute statement",
            PersistenceOperation::Begin => "begin transaction",
            PersistenceOperation::Commit => "commit transaction",
            PersistenceOperation::Rollback => "rollback transaction",
        }
    }
}

impl std::fmt::Display for PersistenceOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for migration catalog construction and runs
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Invalid migration file name '{input}': expected '<sequence>.<title>.migration.{extension}'")]
    Format { input: String, extension: String },

    #[error("Invalid migration {file_name}: {reason}")]
    InvalidUnit { file_name: String, reason: String },

    #[error("Duplicate sequence number {sequence_number} for migrations {file_name} and {conflicting}")]
    DuplicateSequence {
        sequence_number: i64,
        file_name: String,
        conflicting: String,
    },

    #[error("Failed to {operation}: {message}")]
    Persistence {
        operation: PersistenceOperation,
        message: String,
    },

    #[error("Migration lock {lock_id} error: {message}")]
    Lock { lock_id: i64, message: String },

    #[error("Failed to load migrations: {message}")]
    Loader { message: String },

    #[error("Migration {file_name} failed: {fault}")]
    Execution {
        file_name: String,
        fault: ExecutionFault,
        outcome: Box<RunOutcome>,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl MigrationError {
    pub fn persistence(operation: PersistenceOperation, message: impl Into<String>) -> Self {
        MigrationError::Persistence {
            operation,
            message: message.into(),
        }
    }

    pub fn invalid_unit(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrationError::InvalidUnit {
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }

    /// True when a migration action raised the error, as opposed to the runner
    /// failing to read or write its history.
    pub fn is_execution_fault(&self) -> bool {
        matches!(self, MigrationError::Execution { .. })
    }

    /// Partial outcome of a run aborted by a failing migration
    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            MigrationError::Execution { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::persistence(PersistenceOperation::Statement, err.to_string())
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Loader {
            message: err.to_string(),
        }
    }
}
