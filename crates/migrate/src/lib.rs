//! # elif-migrate: Migration Runner for elif.rs
//!
//! Applies and reverts sequence-numbered migrations exactly once per target
//! store, even when several processes start a run at the same time.
//!
//! Migrations are named `<sequence>.<title>.migration.<ext>` and ordered by
//! their sequence number. A run takes a named lock, compares the latest applied
//! sequence number with the requested target to pick a direction, executes the
//! eligible migrations one at a time and records them in the history table in
//! a single transaction.
//!
//! ```ignore
//! use elif_migrate::{DirectoryLoader, MigrationRunner, PgDatasource, RunnerConfig};
//!
//! let config = RunnerConfig::from_env()?;
//! let loader = DirectoryLoader::from_config(&config);
//! let runner = MigrationRunner::new(PgDatasource::from_env().await?, config, loader);
//! let outcome = runner.run(None).await?;
//! ```

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fault;
pub mod file_name;
pub mod loader;
pub mod memory;
pub mod migration;
pub mod outcome;
pub mod postgres;
pub mod progress;
pub mod record;
pub mod runner;

pub use backend::*;
pub use catalog::*;
pub use config::*;
pub use error::*;
pub use fault::*;
pub use file_name::*;
pub use loader::*;
pub use memory::{MemoryDatasource, MemoryLock, MemoryOperation, MemorySession};
pub use migration::*;
pub use outcome::*;
pub use postgres::{PgAdvisoryLock, PgDatasource, PgSession};
pub use progress::*;
pub use record::*;
pub use runner::*;
