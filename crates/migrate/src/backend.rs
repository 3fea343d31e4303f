//! Database collaborator traits
//!
//! The runner never talks to a driver directly. A [`Datasource`] hands out a
//! [`NamedLock`] and a [`Session`]; the session executes statements, controls
//! the run's transaction and reads and writes the catalog table through
//! [`HistoryStore`]. `postgres` and `memory` provide implementations.

use async_trait::async_trait;

use crate::error::MigrationResult;
use crate::record::{ExecutionRecord, HistoryRecord};

/// Schema and table holding the migration history
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryTable {
    pub schema: String,
    pub table: String,
}

impl HistoryTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `schema.table`, unquoted
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

impl std::fmt::Display for HistoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Executes statements on behalf of a migration action
#[async_trait]
pub trait StatementExecutor: Send {
    /// Execute a statement (or a script of statements) and return the number of
    /// affected rows
    async fn execute(&mut self, sql: &str) -> MigrationResult<u64>;
}

/// Persistence of the migration history
#[async_trait]
pub trait HistoryStore: Send {
    /// Create schema and table if they do not exist
    async fn ensure_catalog_table(&mut self, table: &HistoryTable) -> MigrationResult<()>;

    /// Whether the table exists, without creating it
    async fn catalog_table_exists(&mut self, table: &HistoryTable) -> MigrationResult<bool>;

    /// Highest sequence number whose latest row is an apply, `None` when there
    /// is none
    async fn latest_sequence(&mut self, table: &HistoryTable) -> MigrationResult<Option<i64>>;

    /// All records ordered by sequence number ascending
    async fn list_all(&mut self, table: &HistoryTable) -> MigrationResult<Vec<HistoryRecord>>;

    async fn find_by_file_name(
        &mut self,
        table: &HistoryTable,
        file_name: &str,
    ) -> MigrationResult<Option<HistoryRecord>>;

    /// Record the executed migrations of a run; a no-op for an empty batch.
    ///
    /// The table keeps one row per sequence number, so a revert replaces the
    /// row written when the migration was applied.
    async fn append_batch(
        &mut self,
        table: &HistoryTable,
        records: &[ExecutionRecord],
    ) -> MigrationResult<()>;
}

/// A dedicated connection driving one run
#[async_trait]
pub trait Session: StatementExecutor + HistoryStore {
    async fn begin_transaction(&mut self) -> MigrationResult<()>;

    async fn commit_transaction(&mut self) -> MigrationResult<()>;

    async fn rollback_transaction(&mut self) -> MigrationResult<()>;
}

/// Process-external mutual exclusion keyed by a fixed identifier
#[async_trait]
pub trait NamedLock: Send {
    /// Block until the lock is held. There is no timeout.
    async fn acquire(&mut self) -> MigrationResult<()>;

    async fn release(&mut self) -> MigrationResult<()>;
}

/// Source of sessions and locks for one target store
#[async_trait]
pub trait Datasource: Send + Sync {
    type Session: Session + 'static;
    type Lock: NamedLock + 'static;

    fn create_lock(&self, lock_id: i64) -> Self::Lock;

    async fn create_session(&self) -> MigrationResult<Self::Session>;
}
