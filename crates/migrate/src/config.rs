//! Runner configuration
//!
//! Values come from code or from `MIGRATION_*` environment variables.

use std::env;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::backend::HistoryTable;
use crate::file_name::DEFAULT_EXTENSION;

/// Random but well-known lock identifier shared by every runner instance
pub const DEFAULT_LOCK_ID: i64 = 708_954_078;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_TABLE: &str = "migrations";

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is a valid regex")
});

/// Configuration error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Configuration for the migration runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Schema holding the history table
    pub schema: String,
    /// History table name
    pub table: String,
    /// Named lock serializing runners against the same store
    pub lock_id: i64,
    /// Extension of migration file names
    pub extension: String,
    /// Directory scanned by the directory loader
    pub migrations_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
            lock_id: DEFAULT_LOCK_ID,
            extension: DEFAULT_EXTENSION.to_string(),
            migrations_dir: PathBuf::from("migrations"),
        }
    }
}

impl RunnerConfig {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn with_lock_id(mut self, lock_id: i64) -> Self {
        self.lock_id = lock_id;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn history_table(&self) -> HistoryTable {
        HistoryTable::new(&self.schema, &self.table)
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(schema) = env::var("MIGRATION_SCHEMA") {
            config.schema = schema;
        }

        if let Ok(table) = env::var("MIGRATION_TABLE") {
            config.table = table;
        }

        if let Ok(lock_id) = env::var("MIGRATION_LOCK_ID") {
            config.lock_id = lock_id.trim().parse().map_err(|_| {
                ConfigError::invalid_value("lock_id", &lock_id, "64-bit integer")
            })?;
        }

        if let Ok(extension) = env::var("MIGRATION_EXTENSION") {
            config.extension = extension;
        }

        if let Ok(dir) = env::var("MIGRATION_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("schema", &self.schema)?;
        validate_identifier("table", &self.table)?;

        if self.extension.is_empty()
            || !self
                .extension
                .trim_start_matches('.')
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::invalid_value(
                "extension",
                &self.extension,
                "alphanumeric file extension",
            ));
        }

        Ok(())
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::missing_required(
            field,
            format!("The {} is required.", field),
        ));
    }
    if !IDENTIFIER.is_match(value) {
        return Err(ConfigError::invalid_value(
            field,
            value,
            "identifier of letters, digits and underscores",
        ));
    }
    Ok(())
}
