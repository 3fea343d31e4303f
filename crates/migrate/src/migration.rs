//! Migration definitions
//!
//! A [`MigrationUnit`] describes one schema change: its position in the
//! sequence, its file name and the actions that apply and revert it. Units are
//! only created through [`MigrationUnitBuilder`], which rejects a unit that has
//! neither action.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::StatementExecutor;
use crate::error::{MigrationError, MigrationResult};
use crate::fault::ExecutionFault;
use crate::file_name::{FileNameCodec, FileNameParts};

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Apply the migration (stored as `up`)
    #[serde(rename = "up")]
    Apply,
    /// Revert the migration (stored as `down`)
    #[serde(rename = "down")]
    Revert,
}

impl Direction {
    /// Value persisted in the `direction` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Apply => "up",
            Direction::Revert => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "apply" => Ok(Direction::Apply),
            "down" | "revert" => Ok(Direction::Revert),
            _ => Err(format!("Unknown migration direction: {}", s)),
        }
    }
}

/// One side of a migration: applies or reverts its schema change.
///
/// The executor is only valid for the duration of the call and runs inside the
/// transaction of the current run.
#[async_trait]
pub trait MigrationAction: Send + Sync {
    async fn run(&self, executor: &mut dyn StatementExecutor) -> Result<(), ExecutionFault>;
}

/// Action executing a static SQL script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlAction {
    sql: String,
}

impl SqlAction {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[async_trait]
impl MigrationAction for SqlAction {
    async fn run(&self, executor: &mut dyn StatementExecutor) -> Result<(), ExecutionFault> {
        if self.sql.trim().is_empty() {
            return Ok(());
        }
        executor.execute(&self.sql).await?;
        Ok(())
    }
}

/// Boxed future returned by closure-based actions
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExecutionFault>> + Send + 'a>>;

/// Action backed by an async closure
///
/// ```ignore
/// let action = FnAction::new(|db| Box::pin(async move {
///     db.execute("CREATE TABLE users (id SERIAL PRIMARY KEY)").await?;
///     Ok(())
/// }));
/// ```
pub struct FnAction<F> {
    f: F,
}

impl<F> FnAction<F>
where
    F: for<'a> Fn(&'a mut dyn StatementExecutor) -> ActionFuture<'a> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> MigrationAction for FnAction<F>
where
    F: for<'a> Fn(&'a mut dyn StatementExecutor) -> ActionFuture<'a> + Send + Sync,
{
    async fn run(&self, executor: &mut dyn StatementExecutor) -> Result<(), ExecutionFault> {
        (self.f)(executor).await
    }
}

/// The actions a migration provides; at least one is always present
#[derive(Clone)]
pub enum MigrationActions {
    Apply(Arc<dyn MigrationAction>),
    Revert(Arc<dyn MigrationAction>),
    Both {
        apply: Arc<dyn MigrationAction>,
        revert: Arc<dyn MigrationAction>,
    },
}

impl MigrationActions {
    pub fn apply(&self) -> Option<&Arc<dyn MigrationAction>> {
        match self {
            MigrationActions::Apply(apply) | MigrationActions::Both { apply, .. } => Some(apply),
            MigrationActions::Revert(_) => None,
        }
    }

    pub fn revert(&self) -> Option<&Arc<dyn MigrationAction>> {
        match self {
            MigrationActions::Revert(revert) | MigrationActions::Both { revert, .. } => {
                Some(revert)
            }
            MigrationActions::Apply(_) => None,
        }
    }

    pub fn for_direction(&self, direction: Direction) -> Option<&Arc<dyn MigrationAction>> {
        match direction {
            Direction::Apply => self.apply(),
            Direction::Revert => self.revert(),
        }
    }
}

impl fmt::Debug for MigrationActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationActions::Apply(_) => "Apply",
            MigrationActions::Revert(_) => "Revert",
            MigrationActions::Both { .. } => "Both",
        };
        f.write_str(name)
    }
}

/// Represents a database migration
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    sequence_number: i64,
    title: String,
    file_name: String,
    description: Option<String>,
    actions: MigrationActions,
}

impl MigrationUnit {
    /// Start building a unit from already parsed file name parts
    pub fn builder(parts: FileNameParts) -> MigrationUnitBuilder {
        MigrationUnitBuilder::new(parts)
    }

    /// Start building a unit from a file name, validated against `codec`
    pub fn from_file_name(codec: &FileNameCodec, name: &str) -> MigrationResult<MigrationUnitBuilder> {
        Ok(MigrationUnitBuilder::new(codec.parse(name)?))
    }

    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn actions(&self) -> &MigrationActions {
        &self.actions
    }

    pub fn has_apply(&self) -> bool {
        self.actions.apply().is_some()
    }

    pub fn has_revert(&self) -> bool {
        self.actions.revert().is_some()
    }

    /// Title for log messages, falling back to the file name
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.file_name
        } else {
            &self.title
        }
    }
}

/// Validating factory for [`MigrationUnit`]
pub struct MigrationUnitBuilder {
    parts: FileNameParts,
    title: Option<String>,
    description: Option<String>,
    apply: Option<Arc<dyn MigrationAction>>,
    revert: Option<Arc<dyn MigrationAction>>,
}

impl MigrationUnitBuilder {
    fn new(parts: FileNameParts) -> Self {
        Self {
            parts,
            title: None,
            description: None,
            apply: None,
            revert: None,
        }
    }

    /// Override the title parsed from the file name
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn apply(mut self, action: impl MigrationAction + 'static) -> Self {
        self.apply = Some(Arc::new(action));
        self
    }

    pub fn revert(mut self, action: impl MigrationAction + 'static) -> Self {
        self.revert = Some(Arc::new(action));
        self
    }

    pub fn apply_arc(mut self, action: Arc<dyn MigrationAction>) -> Self {
        self.apply = Some(action);
        self
    }

    pub fn revert_arc(mut self, action: Arc<dyn MigrationAction>) -> Self {
        self.revert = Some(action);
        self
    }

    pub fn apply_sql(self, sql: impl Into<String>) -> Self {
        self.apply(SqlAction::new(sql))
    }

    pub fn revert_sql(self, sql: impl Into<String>) -> Self {
        self.revert(SqlAction::new(sql))
    }

    pub fn build(self) -> MigrationResult<MigrationUnit> {
        let actions = match (self.apply, self.revert) {
            (Some(apply), Some(revert)) => MigrationActions::Both { apply, revert },
            (Some(apply), None) => MigrationActions::Apply(apply),
            (None, Some(revert)) => MigrationActions::Revert(revert),
            (None, None) => {
                return Err(MigrationError::invalid_unit(
                    self.parts.file_name,
                    "does not implement apply or revert",
                ))
            }
        };

        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(MigrationUnit {
            sequence_number: self.parts.sequence_number,
            title: self.title.unwrap_or(self.parts.title),
            file_name: self.parts.file_name,
            description,
            actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(name: &str) -> FileNameParts {
        FileNameCodec::default().parse(name).unwrap()
    }

    #[test]
    fn test_builder_requires_an_action() {
        let err = MigrationUnit::builder(parts("1.empty.migration.sql"))
            .description("nothing to do")
            .build()
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidUnit { .. }));
    }

    #[test]
    fn test_builder_variants() {
        let apply_only = MigrationUnit::builder(parts("1.a.migration.sql"))
            .apply_sql("CREATE TABLE a (id INT)")
            .build()
            .unwrap();
        assert!(apply_only.has_apply());
        assert!(!apply_only.has_revert());

        let revert_only = MigrationUnit::builder(parts("2.b.migration.sql"))
            .revert_sql("DROP TABLE a")
            .build()
            .unwrap();
        assert!(!revert_only.has_apply());
        assert!(revert_only.actions().for_direction(Direction::Revert).is_some());

        let both = MigrationUnit::builder(parts("3.c.migration.sql"))
            .apply_sql("SELECT 1")
            .revert_sql("SELECT 2")
            .build()
            .unwrap();
        assert!(matches!(both.actions(), MigrationActions::Both { .. }));
    }

    #[test]
    fn test_metadata_from_file_name() {
        let unit = MigrationUnit::from_file_name(&FileNameCodec::default(), "1700000000000.Create-Users.migration.sql")
            .unwrap()
            .description("\n  Creates the users table.\n  ")
            .apply_sql("CREATE TABLE users (id INT)")
            .build()
            .unwrap();
        assert_eq!(unit.sequence_number(), 1_700_000_000_000);
        assert_eq!(unit.title(), "create-users");
        assert_eq!(unit.file_name(), "1700000000000.create-users.migration.sql");
        assert_eq!(unit.description(), Some("Creates the users table."));
    }

    #[test]
    fn test_display_name_falls_back_to_file_name() {
        let unit = MigrationUnit::builder(parts("5.migration.sql"))
            .apply_sql("SELECT 1")
            .build()
            .unwrap();
        assert_eq!(unit.display_name(), "5.migration.sql");
    }

    #[test]
    fn test_direction_round_trip() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Apply);
        assert_eq!("DOWN".parse::<Direction>().unwrap(), Direction::Revert);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(serde_json::to_string(&Direction::Revert).unwrap(), "\"down\"");
    }
}
