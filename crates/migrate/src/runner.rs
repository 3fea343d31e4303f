//! Migration Runner - applies and reverts migrations against a target store
//!
//! One run holds the named lock from table creation through commit, so runner
//! instances started concurrently against the same store execute one after the
//! other. A run opens its session only once it holds the lock, so waiting
//! runners hold no connection. Each run resolves a direction from the latest applied sequence number
//! and the requested target, walks the catalog in that direction and records
//! every executed migration inside a single transaction.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::backend::{Datasource, HistoryStore, HistoryTable, NamedLock, Session, StatementExecutor};
use crate::catalog::MigrationCatalog;
use crate::config::RunnerConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::loader::MigrationLoader;
use crate::migration::{Direction, MigrationAction, MigrationUnit};
use crate::outcome::{RunOutcome, SkipReason};
use crate::progress::{ProgressSink, TracingProgressSink};
use crate::record::{ExecutionRecord, HistoryRecord};

/// Catalog unit paired with its history row
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub unit: Arc<MigrationUnit>,
    pub record: Option<HistoryRecord>,
}

impl MigrationStatus {
    /// Whether the unit's latest recorded execution applied it
    pub fn is_applied(&self) -> bool {
        self.record
            .as_ref()
            .map(|r| r.direction == Direction::Apply)
            .unwrap_or(false)
    }
}

/// Migration runner that executes a catalog against a datasource
pub struct MigrationRunner<D: Datasource> {
    datasource: D,
    config: RunnerConfig,
    loader: Box<dyn MigrationLoader>,
    progress: Arc<dyn ProgressSink>,
}

impl<D: Datasource> MigrationRunner<D> {
    /// Create a runner reporting progress through `tracing`
    pub fn new(datasource: D, config: RunnerConfig, loader: impl MigrationLoader + 'static) -> Self {
        Self {
            datasource,
            config,
            loader: Box::new(loader),
            progress: Arc::new(TracingProgressSink),
        }
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    pub fn datasource(&self) -> &D {
        &self.datasource
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run migrations towards `target`.
    ///
    /// `None` or `Some(0)` runs every pending migration forward. A target below
    /// the latest applied sequence number reverts every applied migration above
    /// it, newest first.
    ///
    /// Persistence, lock and loader failures are returned before any history is
    /// written. A failing migration action stops the run and is returned as
    /// [`MigrationError::Execution`] carrying the partial outcome. In both cases
    /// the transaction is rolled back and the lock is released.
    pub async fn run(&self, target: Option<i64>) -> MigrationResult<RunOutcome> {
        let started = Instant::now();
        let mut lock = self.datasource.create_lock(self.config.lock_id);

        lock.acquire().await?;
        debug!("Migration lock {} acquired", self.config.lock_id);

        let result = match self.datasource.create_session().await {
            Ok(mut session) => self.run_locked(&mut session, target, started).await,
            Err(e) => Err(e),
        };

        match lock.release().await {
            Ok(()) => debug!("Migration lock {} released", self.config.lock_id),
            Err(e) => warn!("Failed to release migration lock {}: {}", self.config.lock_id, e),
        }

        result
    }

    async fn run_locked(
        &self,
        session: &mut D::Session,
        target: Option<i64>,
        started: Instant,
    ) -> MigrationResult<RunOutcome> {
        let table = self.config.history_table();

        session.ensure_catalog_table(&table).await?;
        let latest = session.latest_sequence(&table).await?.unwrap_or(0);

        let target = resolve_target(target);
        let direction = resolve_direction(latest, target);
        debug!(
            "Resolved migration direction {} (latest: {}, target: {})",
            direction,
            latest,
            target.map_or_else(|| "unbounded".to_string(), |t| t.to_string())
        );

        let catalog = self.loader.load().await?;

        session.begin_transaction().await?;
        debug!("Migration transaction started");

        match self
            .execute_batch(session, &table, &catalog, direction, latest, target)
            .await
        {
            Ok(mut outcome) => {
                if let Err(e) = session.commit_transaction().await {
                    rollback(session).await;
                    return Err(e);
                }
                outcome.duration = started.elapsed();
                info!(
                    "Migrations {}: {} executed, {} skipped in {}ms",
                    direction,
                    outcome.executed.len(),
                    outcome.skipped.len(),
                    outcome.duration.as_millis()
                );
                Ok(outcome)
            }
            Err(mut e) => {
                rollback(session).await;
                if let MigrationError::Execution { outcome, .. } = &mut e {
                    outcome.duration = started.elapsed();
                }
                Err(e)
            }
        }
    }

    async fn execute_batch(
        &self,
        session: &mut D::Session,
        table: &HistoryTable,
        catalog: &MigrationCatalog,
        direction: Direction,
        latest: i64,
        target: Option<i64>,
    ) -> MigrationResult<RunOutcome> {
        let mut outcome = RunOutcome::new(direction, latest, target);

        let mut units = catalog.to_ordered_vec();
        if direction == Direction::Revert {
            units.reverse();
        }

        for unit in &units {
            let action = match eligible_action(unit, direction, latest, target) {
                Ok(action) => action,
                Err(reason) => {
                    self.progress.skipped(unit, reason);
                    outcome.record_skipped(unit.clone(), reason);
                    continue;
                }
            };

            let unit_started = Instant::now();
            let executor: &mut dyn StatementExecutor = &mut *session;
            match action.run(executor).await {
                Ok(()) => {
                    let record = ExecutionRecord::new(unit, direction, unit_started.elapsed());
                    self.progress.succeeded(unit, &record);
                    outcome.record_executed(unit.clone(), record);
                }
                Err(fault) => {
                    self.progress.failed(unit, &fault);
                    outcome.set_failed(unit.clone(), fault.clone(), unit_started.elapsed());
                    return Err(MigrationError::Execution {
                        file_name: unit.file_name().to_string(),
                        fault,
                        outcome: Box::new(outcome),
                    });
                }
            }
        }

        session.append_batch(table, outcome.records()).await?;
        Ok(outcome)
    }

    /// Every history row, ordered by sequence number.
    ///
    /// Reads never create the catalog table; a store no run has touched yet
    /// has an empty history.
    pub async fn history(&self) -> MigrationResult<Vec<HistoryRecord>> {
        let table = self.config.history_table();
        let mut session = self.datasource.create_session().await?;
        if !session.catalog_table_exists(&table).await? {
            return Ok(Vec::new());
        }
        session.list_all(&table).await
    }

    /// History row stored for `file_name`
    pub async fn find_record(&self, file_name: &str) -> MigrationResult<Option<HistoryRecord>> {
        let table = self.config.history_table();
        let mut session = self.datasource.create_session().await?;
        if !session.catalog_table_exists(&table).await? {
            return Ok(None);
        }
        session.find_by_file_name(&table, file_name).await
    }

    /// Catalog units in ascending order, each with its history row
    pub async fn status(&self) -> MigrationResult<Vec<MigrationStatus>> {
        let catalog = self.loader.load().await?;
        let mut history = self.history().await?;

        Ok(catalog
            .iter()
            .map(|unit| {
                let position = history
                    .iter()
                    .position(|r| r.sequence_number == unit.sequence_number());
                MigrationStatus {
                    unit: unit.clone(),
                    record: position.map(|i| history.swap_remove(i)),
                }
            })
            .collect())
    }
}

async fn rollback<S: Session>(session: &mut S) {
    match session.rollback_transaction().await {
        Ok(()) => debug!("Migration transaction rolled back"),
        Err(e) => warn!("Failed to roll back migration transaction: {}", e),
    }
}

/// Treat a missing or zero target as "no explicit target"
pub fn resolve_target(target: Option<i64>) -> Option<i64> {
    target.filter(|&t| t != 0)
}

/// Apply when the latest applied sequence number is below the target
pub fn resolve_direction(latest: i64, target: Option<i64>) -> Direction {
    match target {
        Some(target) if latest >= target => Direction::Revert,
        _ => Direction::Apply,
    }
}

/// Why `unit` is not executed in a run, `None` when it is
pub fn skip_reason(
    unit: &MigrationUnit,
    direction: Direction,
    latest: i64,
    target: Option<i64>,
) -> Option<SkipReason> {
    eligible_action(unit, direction, latest, target).err()
}

/// The action a run executes for `unit`, or why the unit is skipped.
///
/// A missing action is checked first, then the history, then the target.
fn eligible_action(
    unit: &MigrationUnit,
    direction: Direction,
    latest: i64,
    target: Option<i64>,
) -> Result<&Arc<dyn MigrationAction>, SkipReason> {
    let action = unit
        .actions()
        .for_direction(direction)
        .ok_or(SkipReason::MissingAction(direction))?;
    let sequence_number = unit.sequence_number();

    let reason = match direction {
        Direction::Apply if sequence_number <= latest => Some(SkipReason::AlreadyExecuted),
        Direction::Apply if target.map_or(false, |t| sequence_number > t) => {
            Some(SkipReason::OutOfRange)
        }
        Direction::Revert if sequence_number > latest => Some(SkipReason::NeverApplied),
        Direction::Revert if target.map_or(true, |t| sequence_number <= t) => {
            Some(SkipReason::OutOfRange)
        }
        _ => None,
    };

    match reason {
        Some(reason) => Err(reason),
        None => Ok(action),
    }
}
