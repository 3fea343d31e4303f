//! In-memory backend
//!
//! Implements every collaborator trait without a database: history tables live
//! in a shared map, statements are recorded, transactions buffer their writes
//! until commit and named locks are tokio mutexes keyed by lock id. Failures can
//! be injected per operation to exercise the runner's error paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use crate::backend::{Datasource, HistoryStore, HistoryTable, NamedLock, Session, StatementExecutor};
use crate::error::{MigrationError, MigrationResult, PersistenceOperation};
use crate::migration::Direction;
use crate::record::{ExecutionRecord, HistoryRecord};

/// Operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOperation {
    Connect,
    AcquireLock,
    EnsureTable,
    LatestSequence,
    ListHistory,
    AppendHistory,
    Statement,
    Begin,
    Commit,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<HistoryTable, Vec<HistoryRecord>>,
    statements: Vec<String>,
    failures: HashSet<MemoryOperation>,
    commits: usize,
    rollbacks: usize,
    open_sessions: usize,
}

type LockRegistry = HashMap<i64, Arc<tokio::sync::Mutex<()>>>;

/// Datasource keeping everything in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDatasource {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<Mutex<LockRegistry>>,
}

impl MemoryDatasource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `operation` fail
    pub fn fail_on(&self, operation: MemoryOperation) {
        lock_state(&self.state).failures.insert(operation);
    }

    pub fn clear_failure(&self, operation: MemoryOperation) {
        lock_state(&self.state).failures.remove(&operation);
    }

    /// Store history rows as if earlier runs had applied them
    pub fn seed_history(&self, table: &HistoryTable, sequence_numbers: &[i64]) {
        let mut state = lock_state(&self.state);
        let rows = state.tables.entry(table.clone()).or_default();
        for &sequence_number in sequence_numbers {
            upsert(
                rows,
                HistoryRecord {
                    sequence_number,
                    file_name: format!("{}.seeded.migration.sql", sequence_number),
                    direction: Direction::Apply,
                    description: None,
                    duration: 0,
                    created_at: Utc::now(),
                },
            );
        }
    }

    /// Committed history rows ordered by sequence number
    pub fn records(&self, table: &HistoryTable) -> Vec<HistoryRecord> {
        let state = lock_state(&self.state);
        let mut rows = state.tables.get(table).cloned().unwrap_or_default();
        rows.sort_by_key(|r| r.sequence_number);
        rows
    }

    pub fn table_exists(&self, table: &HistoryTable) -> bool {
        lock_state(&self.state).tables.contains_key(table)
    }

    /// Committed statements in execution order
    pub fn statements(&self) -> Vec<String> {
        lock_state(&self.state).statements.clone()
    }

    pub fn commit_count(&self) -> usize {
        lock_state(&self.state).commits
    }

    pub fn rollback_count(&self) -> usize {
        lock_state(&self.state).rollbacks
    }

    /// Sessions created and not yet dropped
    pub fn open_session_count(&self) -> usize {
        lock_state(&self.state).open_sessions
    }

    /// Whether some lock handle currently holds `lock_id`
    pub fn is_locked(&self, lock_id: i64) -> bool {
        let registry = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        registry
            .get(&lock_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    fn lock_for(&self, lock_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut registry = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        registry.entry(lock_id).or_default().clone()
    }
}

#[async_trait]
impl Datasource for MemoryDatasource {
    type Session = MemorySession;
    type Lock = MemoryLock;

    fn create_lock(&self, lock_id: i64) -> MemoryLock {
        MemoryLock {
            lock_id,
            mutex: self.lock_for(lock_id),
            guard: None,
            state: self.state.clone(),
        }
    }

    async fn create_session(&self) -> MigrationResult<MemorySession> {
        let mut state = lock_state(&self.state);
        if state.failures.contains(&MemoryOperation::Connect) {
            return Err(MigrationError::persistence(
                PersistenceOperation::Connect,
                "injected failure for Connect",
            ));
        }
        state.open_sessions += 1;
        drop(state);

        Ok(MemorySession {
            state: self.state.clone(),
            transaction: None,
        })
    }
}

#[derive(Debug, Default)]
struct PendingTransaction {
    statements: Vec<String>,
    appended: Vec<(HistoryTable, HistoryRecord)>,
}

/// Session over [`MemoryDatasource`]
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    transaction: Option<PendingTransaction>,
}

impl MemorySession {
    fn check(&self, operation: MemoryOperation, persistence: PersistenceOperation) -> MigrationResult<()> {
        if lock_state(&self.state).failures.contains(&operation) {
            return Err(MigrationError::persistence(
                persistence,
                format!("injected failure for {:?}", operation),
            ));
        }
        Ok(())
    }

    /// Committed rows plus rows written by the open transaction
    fn visible_rows(&self, table: &HistoryTable) -> MigrationResult<Vec<HistoryRecord>> {
        let state = lock_state(&self.state);
        let mut rows = state.tables.get(table).cloned().ok_or_else(|| {
            MigrationError::persistence(
                PersistenceOperation::ListHistory,
                format!("relation \"{}\" does not exist", table),
            )
        })?;
        if let Some(tx) = &self.transaction {
            for (target, record) in &tx.appended {
                if target == table {
                    upsert(&mut rows, record.clone());
                }
            }
        }
        rows.sort_by_key(|r| r.sequence_number);
        Ok(rows)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

#[async_trait]
impl StatementExecutor for MemorySession {
    async fn execute(&mut self, sql: &str) -> MigrationResult<u64> {
        self.check(MemoryOperation::Statement, PersistenceOperation::Statement)?;
        match &mut self.transaction {
            Some(tx) => tx.statements.push(sql.to_string()),
            None => lock_state(&self.state).statements.push(sql.to_string()),
        }
        Ok(0)
    }
}

#[async_trait]
impl HistoryStore for MemorySession {
    async fn ensure_catalog_table(&mut self, table: &HistoryTable) -> MigrationResult<()> {
        self.check(MemoryOperation::EnsureTable, PersistenceOperation::EnsureTable)?;
        lock_state(&self.state).tables.entry(table.clone()).or_default();
        Ok(())
    }

    async fn catalog_table_exists(&mut self, table: &HistoryTable) -> MigrationResult<bool> {
        self.check(MemoryOperation::ListHistory, PersistenceOperation::ListHistory)?;
        Ok(lock_state(&self.state).tables.contains_key(table))
    }

    async fn latest_sequence(&mut self, table: &HistoryTable) -> MigrationResult<Option<i64>> {
        self.check(MemoryOperation::LatestSequence, PersistenceOperation::LatestSequence)?;
        Ok(self
            .visible_rows(table)?
            .iter()
            .filter(|r| r.direction == Direction::Apply)
            .map(|r| r.sequence_number)
            .max())
    }

    async fn list_all(&mut self, table: &HistoryTable) -> MigrationResult<Vec<HistoryRecord>> {
        self.check(MemoryOperation::ListHistory, PersistenceOperation::ListHistory)?;
        self.visible_rows(table)
    }

    async fn find_by_file_name(
        &mut self,
        table: &HistoryTable,
        file_name: &str,
    ) -> MigrationResult<Option<HistoryRecord>> {
        self.check(MemoryOperation::ListHistory, PersistenceOperation::FindRecord)?;
        Ok(self
            .visible_rows(table)?
            .into_iter()
            .find(|r| r.file_name == file_name))
    }

    async fn append_batch(
        &mut self,
        table: &HistoryTable,
        records: &[ExecutionRecord],
    ) -> MigrationResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.check(MemoryOperation::AppendHistory, PersistenceOperation::AppendHistory)?;

        let created_at = Utc::now();
        let rows: Vec<HistoryRecord> = records
            .iter()
            .cloned()
            .map(|r| r.into_history(created_at))
            .collect();

        match &mut self.transaction {
            Some(tx) => tx
                .appended
                .extend(rows.into_iter().map(|row| (table.clone(), row))),
            None => {
                let mut state = lock_state(&self.state);
                let existing = state.tables.get_mut(table).ok_or_else(|| {
                    MigrationError::persistence(
                        PersistenceOperation::AppendHistory,
                        format!("relation \"{}\" does not exist", table),
                    )
                })?;
                for row in rows {
                    upsert(existing, row);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn begin_transaction(&mut self) -> MigrationResult<()> {
        self.check(MemoryOperation::Begin, PersistenceOperation::Begin)?;
        if self.transaction.is_some() {
            return Err(MigrationError::persistence(
                PersistenceOperation::Begin,
                "transaction already in progress",
            ));
        }
        self.transaction = Some(PendingTransaction::default());
        Ok(())
    }

    async fn commit_transaction(&mut self) -> MigrationResult<()> {
        self.check(MemoryOperation::Commit, PersistenceOperation::Commit)?;
        let tx = self.transaction.take().ok_or_else(|| {
            MigrationError::persistence(PersistenceOperation::Commit, "no transaction in progress")
        })?;

        let mut state = lock_state(&self.state);
        state.statements.extend(tx.statements);
        for (table, row) in tx.appended {
            let rows = state.tables.get_mut(&table).ok_or_else(|| {
                MigrationError::persistence(
                    PersistenceOperation::Commit,
                    format!("relation \"{}\" does not exist", table),
                )
            })?;
            upsert(rows, row);
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> MigrationResult<()> {
        if self.transaction.take().is_some() {
            lock_state(&self.state).rollbacks += 1;
        }
        Ok(())
    }
}

/// Named lock over [`MemoryDatasource`]
#[derive(Debug)]
pub struct MemoryLock {
    lock_id: i64,
    mutex: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLock {
    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

#[async_trait]
impl NamedLock for MemoryLock {
    async fn acquire(&mut self) -> MigrationResult<()> {
        if lock_state(&self.state)
            .failures
            .contains(&MemoryOperation::AcquireLock)
        {
            return Err(MigrationError::Lock {
                lock_id: self.lock_id,
                message: "injected failure for AcquireLock".to_string(),
            });
        }
        if self.guard.is_none() {
            self.guard = Some(self.mutex.clone().lock_owned().await);
        }
        Ok(())
    }

    async fn release(&mut self) -> MigrationResult<()> {
        self.guard.take().map(drop).ok_or_else(|| MigrationError::Lock {
            lock_id: self.lock_id,
            message: "lock is not held".to_string(),
        })
    }
}

/// One row per sequence number; a later execution replaces the earlier row
fn upsert(rows: &mut Vec<HistoryRecord>, record: HistoryRecord) {
    match rows
        .iter_mut()
        .find(|r| r.sequence_number == record.sequence_number)
    {
        Some(existing) => *existing = record,
        None => rows.push(record),
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
