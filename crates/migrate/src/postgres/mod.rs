//! PostgreSQL backend
//!
//! Sessions run on a dedicated pooled connection and control the transaction
//! with plain `BEGIN`/`COMMIT`/`ROLLBACK`, so migration scripts containing
//! several statements run through the simple query protocol. The named lock is
//! a session-level advisory lock held on a connection opened outside the pool,
//! so runners waiting for the lock never exhaust the pool.

pub mod sql;

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Executor, Postgres, Row};
use tracing::debug;

use crate::backend::{Datasource, HistoryStore, HistoryTable, NamedLock, Session, StatementExecutor};
use crate::config::ConfigError;
use crate::error::{MigrationError, MigrationResult, PersistenceOperation};
use crate::migration::Direction;
use crate::record::{ExecutionRecord, HistoryRecord};

/// Datasource over a sqlx PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgDatasource {
    pool: PgPool,
}

impl PgDatasource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool; a run borrows one connection for its session once
    /// it holds the lock
    pub async fn connect(database_url: &str) -> MigrationResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| {
                MigrationError::persistence(
                    PersistenceOperation::Connect,
                    format!("Failed to create PostgreSQL pool: {}", e),
                )
            })?;

        Ok(Self::new(pool))
    }

    /// Connect using `DATABASE_URL`
    pub async fn from_env() -> MigrationResult<Self> {
        let database_url = env::var("DATABASE_URL").map_err(|_| {
            ConfigError::missing_required(
                "DATABASE_URL",
                "Set DATABASE_URL to a postgres:// connection string.",
            )
        })?;
        Self::connect(&database_url).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn acquire(&self) -> MigrationResult<PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(|e| {
            MigrationError::persistence(
                PersistenceOperation::Connect,
                format!("Failed to acquire connection: {}", e),
            )
        })
    }

    /// Open a connection outside the pool with the pool's options
    async fn connect_dedicated(&self) -> MigrationResult<PgConnection> {
        let options = self.pool.connect_options();
        PgConnection::connect_with(&options).await.map_err(|e| {
            MigrationError::persistence(
                PersistenceOperation::Connect,
                format!("Failed to open lock connection: {}", e),
            )
        })
    }
}

#[async_trait]
impl Datasource for PgDatasource {
    type Session = PgSession;
    type Lock = PgAdvisoryLock;

    fn create_lock(&self, lock_id: i64) -> PgAdvisoryLock {
        PgAdvisoryLock {
            lock_id,
            datasource: self.clone(),
            connection: None,
        }
    }

    async fn create_session(&self) -> MigrationResult<PgSession> {
        Ok(PgSession {
            connection: self.acquire().await?,
        })
    }
}

/// Session on one pooled connection
pub struct PgSession {
    connection: PoolConnection<Postgres>,
}

impl PgSession {
    async fn control(&mut self, statement: &str, operation: PersistenceOperation) -> MigrationResult<()> {
        (&mut *self.connection)
            .execute(statement)
            .await
            .map_err(|e| MigrationError::persistence(operation, e.to_string()))?;
        debug!("{} executed", statement);
        Ok(())
    }
}

#[async_trait]
impl StatementExecutor for PgSession {
    async fn execute(&mut self, sql: &str) -> MigrationResult<u64> {
        let result = (&mut *self.connection)
            .execute(sql)
            .await
            .map_err(|e| MigrationError::persistence(PersistenceOperation::Statement, e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl HistoryStore for PgSession {
    async fn catalog_table_exists(&mut self, table: &HistoryTable) -> MigrationResult<bool> {
        sqlx::query_scalar::<_, bool>(sql::TABLE_EXISTS_SQL)
            .bind(sql::qualified_table(table))
            .fetch_one(&mut *self.connection)
            .await
            .map_err(|e| MigrationError::persistence(PersistenceOperation::ListHistory, e.to_string()))
    }

    async fn ensure_catalog_table(&mut self, table: &HistoryTable) -> MigrationResult<()> {
        for statement in [sql::create_schema_sql(table), sql::create_table_sql(table)] {
            sqlx::query(&statement)
                .execute(&mut *self.connection)
                .await
                .map_err(|e| {
                    MigrationError::persistence(PersistenceOperation::EnsureTable, e.to_string())
                })?;
        }
        Ok(())
    }

    async fn latest_sequence(&mut self, table: &HistoryTable) -> MigrationResult<Option<i64>> {
        sqlx::query_scalar::<_, Option<i64>>(&sql::latest_sequence_sql(table))
            .fetch_one(&mut *self.connection)
            .await
            .map_err(|e| MigrationError::persistence(PersistenceOperation::LatestSequence, e.to_string()))
    }

    async fn list_all(&mut self, table: &HistoryTable) -> MigrationResult<Vec<HistoryRecord>> {
        let rows = sqlx::query(&sql::list_all_sql(table))
            .fetch_all(&mut *self.connection)
            .await
            .map_err(|e| MigrationError::persistence(PersistenceOperation::ListHistory, e.to_string()))?;

        rows.iter()
            .map(|row| history_record(row, PersistenceOperation::ListHistory))
            .collect()
    }

    async fn find_by_file_name(
        &mut self,
        table: &HistoryTable,
        file_name: &str,
    ) -> MigrationResult<Option<HistoryRecord>> {
        let row = sqlx::query(&sql::find_by_file_name_sql(table))
            .bind(file_name)
            .fetch_optional(&mut *self.connection)
            .await
            .map_err(|e| MigrationError::persistence(PersistenceOperation::FindRecord, e.to_string()))?;

        row.as_ref()
            .map(|row| history_record(row, PersistenceOperation::FindRecord))
            .transpose()
    }

    async fn append_batch(
        &mut self,
        table: &HistoryTable,
        records: &[ExecutionRecord],
    ) -> MigrationResult<()> {
        for chunk in records.chunks(sql::INSERT_CHUNK_SIZE) {
            let statement = sql::insert_sql(table, chunk.len());
            let mut query = sqlx::query(&statement);
            for record in chunk {
                query = query
                    .bind(record.sequence_number)
                    .bind(&record.file_name)
                    .bind(record.direction.as_str())
                    .bind(&record.description)
                    .bind(i32::try_from(record.duration).unwrap_or(i32::MAX));
            }
            query.execute(&mut *self.connection).await.map_err(|e| {
                MigrationError::persistence(PersistenceOperation::AppendHistory, e.to_string())
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Session for PgSession {
    async fn begin_transaction(&mut self) -> MigrationResult<()> {
        self.control("BEGIN", PersistenceOperation::Begin).await
    }

    async fn commit_transaction(&mut self) -> MigrationResult<()> {
        self.control("COMMIT", PersistenceOperation::Commit).await
    }

    async fn rollback_transaction(&mut self) -> MigrationResult<()> {
        self.control("ROLLBACK", PersistenceOperation::Rollback).await
    }
}

fn history_record(row: &PgRow, operation: PersistenceOperation) -> MigrationResult<HistoryRecord> {
    let decode = |e: sqlx::Error| MigrationError::persistence(operation, e.to_string());

    let direction: String = row.try_get("direction").map_err(decode)?;
    let duration: Option<i32> = row.try_get("duration").map_err(decode)?;
    let created_at: Option<DateTime<Utc>> = row.try_get("created_at").map_err(decode)?;

    Ok(HistoryRecord {
        sequence_number: row.try_get("sequence_number").map_err(decode)?,
        file_name: row.try_get("file_name").map_err(decode)?,
        direction: direction
            .parse::<Direction>()
            .map_err(|e| MigrationError::persistence(operation, e))?,
        description: row.try_get("description").map_err(decode)?,
        duration: i64::from(duration.unwrap_or(0)),
        created_at: created_at.unwrap_or_default(),
    })
}

/// Session-level advisory lock (`pg_advisory_lock`)
///
/// The lock lives on its own connection, opened on acquire and closed on
/// release; it never takes a connection from the pool.
pub struct PgAdvisoryLock {
    lock_id: i64,
    datasource: PgDatasource,
    connection: Option<PgConnection>,
}

impl PgAdvisoryLock {
    fn error(&self, message: impl std::fmt::Display) -> MigrationError {
        MigrationError::Lock {
            lock_id: self.lock_id,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl NamedLock for PgAdvisoryLock {
    async fn acquire(&mut self) -> MigrationResult<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let mut connection = self.datasource.connect_dedicated().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(self.lock_id)
            .execute(&mut connection)
            .await
            .map_err(|e| self.error(e))?;

        self.connection = Some(connection);
        Ok(())
    }

    async fn release(&mut self) -> MigrationResult<()> {
        let mut connection = self
            .connection
            .take()
            .ok_or_else(|| self.error("lock is not held"))?;

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_id)
            .fetch_one(&mut connection)
            .await;

        // Closing the connection ends the session and with it any lock left.
        let closed = connection.close().await;

        match unlocked {
            Ok(true) => {
                if let Err(e) = closed {
                    debug!("Failed to close lock connection {}: {}", self.lock_id, e);
                }
                Ok(())
            }
            Ok(false) => Err(self.error("lock was not held by this session")),
            Err(e) => Err(self.error(e)),
        }
    }
}
