//! Faults raised by migration actions
//!
//! A migration action can fail with a single error, an aggregate of nested
//! errors (for example several statements of a batch failing together), or an
//! arbitrary value that is not an error at all. `render_fault` flattens any of
//! them into one log line.

use crate::error::MigrationError;

/// Failure value produced by a migration's apply or revert action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFault {
    /// A single error with its message
    Error(String),
    /// An error wrapping several nested faults
    Aggregate {
        message: String,
        errors: Vec<ExecutionFault>,
    },
    /// A failure value that is not an error, kept in its stringified form
    Value(String),
}

impl ExecutionFault {
    pub fn error(message: impl Into<String>) -> Self {
        ExecutionFault::Error(message.into())
    }

    pub fn aggregate(message: impl Into<String>, errors: Vec<ExecutionFault>) -> Self {
        ExecutionFault::Aggregate {
            message: message.into(),
            errors,
        }
    }

    pub fn value(value: impl std::fmt::Display) -> Self {
        ExecutionFault::Value(value.to_string())
    }

    /// The fault's own message, without nested faults
    pub fn message(&self) -> &str {
        match self {
            ExecutionFault::Error(message) => message,
            ExecutionFault::Aggregate { message, .. } => message,
            ExecutionFault::Value(value) => value,
        }
    }
}

/// Flatten a fault into a single message.
///
/// Aggregates render their own message first (when non-empty), followed by the
/// message of every nested fault, joined by `, `.
pub fn render_fault(fault: &ExecutionFault) -> String {
    match fault {
        ExecutionFault::Error(message) => message.clone(),
        ExecutionFault::Value(value) => value.clone(),
        ExecutionFault::Aggregate { message, errors } => {
            let mut fragments: Vec<&str> = Vec::with_capacity(errors.len() + 1);
            if !message.is_empty() {
                fragments.push(message);
            }
            fragments.extend(errors.iter().map(ExecutionFault::message));
            fragments.join(", ")
        }
    }
}

impl std::fmt::Display for ExecutionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render_fault(self))
    }
}

impl std::error::Error for ExecutionFault {}

impl From<MigrationError> for ExecutionFault {
    fn from(err: MigrationError) -> Self {
        ExecutionFault::Error(err.to_string())
    }
}

impl From<sqlx::Error> for ExecutionFault {
    fn from(err: sqlx::Error) -> Self {
        ExecutionFault::Error(err.to_string())
    }
}

impl From<anyhow::Error> for ExecutionFault {
    fn from(err: anyhow::Error) -> Self {
        ExecutionFault::Error(err.to_string())
    }
}

impl From<String> for ExecutionFault {
    fn from(message: String) -> Self {
        ExecutionFault::Error(message)
    }
}

impl From<&str> for ExecutionFault {
    fn from(message: &str) -> Self {
        ExecutionFault::Error(message.to_string())
    }
}
