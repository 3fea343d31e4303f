//! End-to-end runs against the in-memory backend
//!
//! Covers direction resolution, the skip policy, fail-fast execution and the
//! lock and transaction guarantees of a run.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use elif_migrate::{
    CollectingProgressSink, Direction, ExecutionFault, FileNameCodec, MemoryDatasource,
    MigrationAction, MigrationCatalog, MigrationError, MigrationRunner, MigrationUnit,
    ProgressEvent, RunnerConfig, SkipReason, StatementExecutor, UnitStatus,
};

/// Action that logs its invocation and optionally fails
struct TrackedAction {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
    fault: Option<ExecutionFault>,
}

#[async_trait]
impl MigrationAction for TrackedAction {
    async fn run(&self, executor: &mut dyn StatementExecutor) -> Result<(), ExecutionFault> {
        self.log.lock().unwrap().push(self.label.clone());
        executor.execute(&self.label).await?;
        tokio::task::yield_now().await;
        match &self.fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }
}

struct Fixture {
    log: Arc<Mutex<Vec<String>>>,
    units: Vec<MigrationUnit>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            units: Vec::new(),
        }
    }

    fn action(&self, label: String, fault: Option<ExecutionFault>) -> TrackedAction {
        TrackedAction {
            label,
            log: self.log.clone(),
            fault,
        }
    }

    fn unit(mut self, sequence_number: i64) -> Self {
        let builder = self
            .builder(sequence_number)
            .apply(self.action(format!("up {}", sequence_number), None))
            .revert(self.action(format!("down {}", sequence_number), None));
        self.units.push(builder.build().unwrap());
        self
    }

    fn failing_unit(mut self, sequence_number: i64, fault: ExecutionFault) -> Self {
        let builder = self
            .builder(sequence_number)
            .apply(self.action(format!("up {}", sequence_number), Some(fault)));
        self.units.push(builder.build().unwrap());
        self
    }

    fn apply_only_unit(mut self, sequence_number: i64) -> Self {
        let builder = self
            .builder(sequence_number)
            .apply(self.action(format!("up {}", sequence_number), None));
        self.units.push(builder.build().unwrap());
        self
    }

    fn builder(&self, sequence_number: i64) -> elif_migrate::MigrationUnitBuilder {
        let codec = FileNameCodec::default();
        MigrationUnit::from_file_name(&codec, &codec.format(sequence_number, "step"))
            .unwrap()
            .description(format!("  step {}  ", sequence_number))
    }

    fn catalog(self) -> (MigrationCatalog, Arc<Mutex<Vec<String>>>) {
        (MigrationCatalog::from_units(self.units).unwrap(), self.log)
    }
}

fn logged(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn empty_catalog_and_history_executes_nothing() {
    init_tracing();
    let datasource = MemoryDatasource::new();
    let runner = MigrationRunner::new(
        datasource.clone(),
        RunnerConfig::default(),
        MigrationCatalog::new(),
    );

    let outcome = runner.run(None).await.unwrap();

    assert_eq!(outcome.direction, Direction::Apply);
    assert_eq!(outcome.from, 0);
    assert!(outcome.executed.is_empty());
    assert!(!outcome.is_failed());
    assert_eq!(outcome.max_file_name_length(), 0);
    assert!(datasource.table_exists(&RunnerConfig::default().history_table()));
    assert!(runner.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn applies_pending_migrations_in_order() {
    let datasource = MemoryDatasource::new();
    let (catalog, log) = Fixture::new().unit(2).unit(1).catalog();
    let runner = MigrationRunner::new(datasource.clone(), RunnerConfig::default(), catalog);

    let outcome = runner.run(None).await.unwrap();

    assert_eq!(logged(&log), vec!["up 1", "up 2"]);
    assert_eq!(outcome.executed_sequence_numbers(), vec![1, 2]);

    let history = datasource.records(&RunnerConfig::default().history_table());
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.direction == Direction::Apply));
    assert_eq!(history[0].file_name, "1.step.migration.sql");
    assert_eq!(history[0].description.as_deref(), Some("step 1"));
}

#[tokio::test]
async fn skips_already_executed_migrations() {
    let datasource = MemoryDatasource::new();
    datasource.seed_history(&RunnerConfig::default().history_table(), &[1]);
    let (catalog, log) = Fixture::new().unit(1).unit(2).catalog();
    let runner = MigrationRunner::new(datasource, RunnerConfig::default(), catalog);

    let outcome = runner.run(None).await.unwrap();

    assert_eq!(logged(&log), vec!["up 2"]);
    assert_eq!(outcome.skipped_sequence_numbers(), vec![1]);
    assert_eq!(outcome.skip_reason(1), Some(SkipReason::AlreadyExecuted));
    assert_eq!(outcome.executed_sequence_numbers(), vec![2]);
}

#[tokio::test]
async fn negative_target_reverts_everything_newest_first() {
    let datasource = MemoryDatasource::new();
    let (catalog, log) = Fixture::new().unit(1).unit(2).catalog();
    let runner = MigrationRunner::new(datasource.clone(), RunnerConfig::default(), catalog);
    runner.run(None).await.unwrap();
    log.lock().unwrap().clear();

    let outcome = runner.run(Some(-1)).await.unwrap();

    assert_eq!(outcome.direction, Direction::Revert);
    assert_eq!(outcome.from, 2);
    assert_eq!(outcome.to, Some(-1));
    assert_eq!(logged(&log), vec!["down 2", "down 1"]);

    let history = datasource.records(&RunnerConfig::default().history_table());
    assert!(history.iter().all(|r| r.direction == Direction::Revert));

    let again = runner.run(None).await.unwrap();
    assert_eq!(again.direction, Direction::Apply);
    assert_eq!(again.executed_sequence_numbers(), vec![1, 2]);
}

#[tokio::test]
async fn target_reverts_only_migrations_above_it() {
    let datasource = MemoryDatasource::new();
    let (catalog, log) = Fixture::new().unit(1).unit(2).catalog();
    let runner = MigrationRunner::new(datasource, RunnerConfig::default(), catalog);
    runner.run(None).await.unwrap();
    log.lock().unwrap().clear();

    let outcome = runner.run(Some(1)).await.unwrap();

    assert_eq!(outcome.direction, Direction::Revert);
    assert_eq!(logged(&log), vec!["down 2"]);
    assert_eq!(outcome.skip_reason(1), Some(SkipReason::OutOfRange));

    let status = runner.status().await.unwrap();
    assert!(status[0].is_applied());
    assert!(!status[1].is_applied());
}

#[tokio::test]
async fn units_without_action_are_skipped() {
    let datasource = MemoryDatasource::new();
    let (catalog, log) = Fixture::new().apply_only_unit(1).unit(2).catalog();
    let runner = MigrationRunner::new(datasource, RunnerConfig::default(), catalog);
    runner.run(None).await.unwrap();
    log.lock().unwrap().clear();

    let outcome = runner.run(Some(-1)).await.unwrap();

    assert_eq!(logged(&log), vec!["down 2"]);
    assert_eq!(
        outcome.skip_reason(1),
        Some(SkipReason::MissingAction(Direction::Revert))
    );
}

#[tokio::test]
async fn failing_migration_stops_the_run() {
    let datasource = MemoryDatasource::new();
    let sink = Arc::new(CollectingProgressSink::new());
    let (catalog, log) = Fixture::new()
        .unit(1)
        .failing_unit(
            2,
            ExecutionFault::aggregate(
                "batch failed",
                vec![
                    ExecutionFault::error("relation \"users\" already exists"),
                    ExecutionFault::error("syntax error"),
                ],
            ),
        )
        .unit(3)
        .catalog();
    let runner = MigrationRunner::new(datasource.clone(), RunnerConfig::default(), catalog)
        .with_progress(sink.clone());

    let err = runner.run(None).await.unwrap_err();

    assert!(err.is_execution_fault());
    assert_eq!(logged(&log), vec!["up 1", "up 2"]);

    let outcome = err.outcome().unwrap();
    assert_eq!(outcome.executed_sequence_numbers(), vec![1]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.status_of(&outcome.failed[0]), UnitStatus::Failed);
    assert!(outcome.failed_duration.is_some());

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1],
        ProgressEvent::Failed {
            sequence_number: 2,
            file_name: "2.step.migration.sql".to_string(),
            error: "batch failed, relation \"users\" already exists, syntax error".to_string(),
        }
    );

    // Nothing of the failed run is kept and the lock is free again.
    assert!(datasource.statements().is_empty());
    assert!(datasource
        .records(&RunnerConfig::default().history_table())
        .is_empty());
    assert_eq!(datasource.rollback_count(), 1);
    assert!(!datasource.is_locked(RunnerConfig::default().lock_id));
}

#[tokio::test]
async fn execution_error_carries_the_fault() {
    let datasource = MemoryDatasource::new();
    let (catalog, _) = Fixture::new()
        .failing_unit(1, ExecutionFault::value("timeout"))
        .catalog();
    let runner = MigrationRunner::new(datasource, RunnerConfig::default(), catalog);

    match runner.run(None).await {
        Err(MigrationError::Execution {
            file_name, fault, ..
        }) => {
            assert_eq!(file_name, "1.step.migration.sql");
            assert_eq!(fault, ExecutionFault::value("timeout"));
        }
        other => panic!("expected an execution fault, got {:?}", other.map(|o| o.executed.len())),
    }
}

#[tokio::test]
async fn concurrent_runners_execute_each_migration_once() {
    let datasource = MemoryDatasource::new();
    let (first_catalog, first_log) = Fixture::new().unit(1).unit(2).catalog();
    let (second_catalog, second_log) = Fixture::new().unit(1).unit(2).catalog();

    let first = MigrationRunner::new(datasource.clone(), RunnerConfig::default(), first_catalog);
    let second = MigrationRunner::new(datasource.clone(), RunnerConfig::default(), second_catalog);

    let (a, b) = tokio::join!(first.run(None), second.run(None));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.executed.len() + b.executed.len(), 2);
    assert_eq!(a.skipped.len() + b.skipped.len(), 2);
    assert_eq!(logged(&first_log).len() + logged(&second_log).len(), 2);
    assert_eq!(
        datasource
            .records(&RunnerConfig::default().history_table())
            .len(),
        2
    );
}

#[tokio::test]
async fn runners_with_different_lock_ids_use_separate_tables() {
    let datasource = MemoryDatasource::new();
    let config = RunnerConfig::new("tenant", "schema_history").with_lock_id(42);
    let (catalog, _) = Fixture::new().unit(1).catalog();
    let runner = MigrationRunner::new(datasource.clone(), config.clone(), catalog);

    runner.run(None).await.unwrap();

    assert_eq!(datasource.records(&config.history_table()).len(), 1);
    assert!(!datasource.table_exists(&RunnerConfig::default().history_table()));
    assert!(!datasource.is_locked(42));
}
