//! Migration loaders
//!
//! Migrations are not known in advance by count or name, so a loader discovers
//! them and assembles the [`MigrationCatalog`] for a run. Two providers exist:
//!
//! - [`StaticLoader`] for migrations compiled into the binary, registered under
//!   their file names (the equivalent of a bundle manifest).
//! - [`DirectoryLoader`] for `.sql` files on disk with `-- up` and `-- down`
//!   sections.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::catalog::MigrationCatalog;
use crate::config::RunnerConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::file_name::{base_name, FileNameCodec};
use crate::migration::{MigrationUnit, MigrationUnitBuilder};

/// Provider of the migration catalog
#[async_trait]
pub trait MigrationLoader: Send + Sync {
    async fn load(&self) -> MigrationResult<MigrationCatalog>;
}

#[async_trait]
impl MigrationLoader for MigrationCatalog {
    async fn load(&self) -> MigrationResult<MigrationCatalog> {
        Ok(self.clone())
    }
}

type Definition = Box<dyn Fn(MigrationUnitBuilder) -> MigrationUnitBuilder + Send + Sync>;

/// Loader for migrations registered in code
///
/// ```ignore
/// let loader = StaticLoader::new(FileNameCodec::default())
///     .register("db/1700000000000.create-users.migration.sql", |m| {
///         m.apply_sql("CREATE TABLE users (id SERIAL PRIMARY KEY)")
///             .revert_sql("DROP TABLE users")
///     });
/// ```
pub struct StaticLoader {
    codec: FileNameCodec,
    entries: Vec<(String, Definition)>,
}

impl StaticLoader {
    pub fn new(codec: FileNameCodec) -> Self {
        Self {
            codec,
            entries: Vec::new(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(FileNameCodec::new(&config.extension))
    }

    /// Register a migration under its path or file name.
    ///
    /// Entries whose file name is not well-formed are ignored at load time.
    pub fn register<F>(mut self, path: impl Into<String>, define: F) -> Self
    where
        F: Fn(MigrationUnitBuilder) -> MigrationUnitBuilder + Send + Sync + 'static,
    {
        self.entries.push((path.into(), Box::new(define)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MigrationLoader for StaticLoader {
    async fn load(&self) -> MigrationResult<MigrationCatalog> {
        let mut catalog = MigrationCatalog::new();

        for (path, define) in &self.entries {
            let Ok(parts) = self.codec.parse(base_name(path)) else {
                debug!("Ignoring {}: not a migration file name", path);
                continue;
            };
            let unit = define(MigrationUnit::builder(parts)).build()?;
            catalog.add(unit)?;
        }

        Ok(catalog)
    }
}

/// Loader for SQL migration files in a directory
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    dir: PathBuf,
    codec: FileNameCodec,
}

impl DirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>, codec: FileNameCodec) -> Self {
        Self {
            dir: dir.into(),
            codec,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(&config.migrations_dir, FileNameCodec::new(&config.extension))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn load_file(&self, path: &Path, file_name: &str) -> MigrationResult<Option<MigrationUnit>> {
        let Ok(parts) = self.codec.parse(file_name) else {
            return Ok(None);
        };

        let content = tokio::fs::read_to_string(path).await.map_err(|e| MigrationError::Loader {
            message: format!("Failed to read migration file {}: {}", path.display(), e),
        })?;
        let script = parse_migration_script(&content);

        let mut builder = MigrationUnit::builder(parts);
        if let Some(description) = script.description {
            builder = builder.description(description);
        }
        if !script.up.is_empty() {
            builder = builder.apply_sql(script.up);
        }
        if !script.down.is_empty() {
            builder = builder.revert_sql(script.down);
        }

        builder.build().map(Some)
    }
}

#[async_trait]
impl MigrationLoader for DirectoryLoader {
    async fn load(&self) -> MigrationResult<MigrationCatalog> {
        let mut catalog = MigrationCatalog::new();

        if !tokio::fs::try_exists(&self.dir).await? {
            debug!("Migrations directory {} does not exist", self.dir.display());
            return Ok(catalog);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| MigrationError::Loader {
            message: format!("Failed to read migrations directory {}: {}", self.dir.display(), e),
        })?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };

            if let Some(unit) = self.load_file(&path, file_name).await? {
                catalog.add(unit)?;
            }
        }

        debug!(
            "Loaded {} migration(s) from {}",
            catalog.len(),
            self.dir.display()
        );
        Ok(catalog)
    }
}

/// Sections of a SQL migration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationScript {
    pub description: Option<String>,
    pub up: String,
    pub down: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Up,
    Down,
}

/// Section a line opens, if it is a marker comment.
///
/// A marker is a whole `--` comment reading `up`, `down`, `up migration` or
/// `down migration`, in any case and with an optional trailing colon. Marker
/// words inside statements or string literals are script content.
fn section_marker(line: &str) -> Option<Section> {
    let comment = line.trim().strip_prefix("--")?;
    let text = comment.trim().trim_end_matches(':').trim_end().to_lowercase();
    match text.as_str() {
        "up" | "up migration" => Some(Section::Up),
        "down" | "down migration" => Some(Section::Down),
        _ => None,
    }
}

/// Split file content into its `-- up` and `-- down` sections.
///
/// `-- description: ...` lines before the first section form the description.
pub fn parse_migration_script(content: &str) -> MigrationScript {
    let mut description = Vec::new();
    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut section = Section::Header;

    for line in content.lines() {
        if let Some(marker) = section_marker(line) {
            section = marker;
            continue;
        }

        match section {
            Section::Header => {
                let trimmed = line.trim();
                let prefix = "-- description:";
                if let Some(text) = trimmed
                    .get(..prefix.len())
                    .filter(|head| head.eq_ignore_ascii_case(prefix))
                    .map(|_| trimmed[prefix.len()..].trim())
                {
                    description.push(text.to_string());
                }
            }
            Section::Up => up.push(line),
            Section::Down => down.push(line),
        }
    }

    let description = description.join("\n");
    MigrationScript {
        description: (!description.is_empty()).then_some(description),
        up: up.join("\n").trim().to_string(),
        down: down.join("\n").trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_migration_script() {
        let script = parse_migration_script(
            "-- description: Create the users table\n\
             -- up\n\
             CREATE TABLE users (id INT);\n\
             \n\
             -- down\n\
             DROP TABLE users;\n",
        );
        assert_eq!(script.description.as_deref(), Some("Create the users table"));
        assert_eq!(script.up, "CREATE TABLE users (id INT);");
        assert_eq!(script.down, "DROP TABLE users;");
    }

    #[test]
    fn test_parse_script_without_down() {
        let script = parse_migration_script("-- Up migration\nCREATE INDEX i ON t (c);");
        assert_eq!(script.up, "CREATE INDEX i ON t (c);");
        assert!(script.down.is_empty());
        assert!(script.description.is_none());
    }

    #[test]
    fn test_marker_words_inside_statements_are_content() {
        let script = parse_migration_script(
            "-- UP:\n\
             INSERT INTO notes (body) VALUES ('setup migration done');\n\
             -- update the counter as well\n\
             UPDATE counters SET n = n + 1;\n\
             -- Down Migration\n\
             DELETE FROM notes WHERE body = 'backup migration';\n\
             -- download cache is kept\n",
        );
        assert_eq!(
            script.up,
            "INSERT INTO notes (body) VALUES ('setup migration done');\n\
             -- update the counter as well\n\
             UPDATE counters SET n = n + 1;"
        );
        assert_eq!(
            script.down,
            "DELETE FROM notes WHERE body = 'backup migration';\n\
             -- download cache is kept"
        );
    }

    #[tokio::test]
    async fn test_static_loader_filters_malformed_names() {
        let loader = StaticLoader::new(FileNameCodec::default())
            .register("db/2.second.migration.sql", |m| m.apply_sql("SELECT 2"))
            .register("db/1.first.migration.sql", |m| {
                m.description("first").apply_sql("SELECT 1").revert_sql("SELECT -1")
            })
            .register("db/readme.md", |m| m.apply_sql("SELECT 0"));

        let catalog = loader.load().await.unwrap();
        assert_eq!(catalog.sequence_numbers(), vec![1, 2]);
        assert_eq!(catalog.get(1).unwrap().description(), Some("first"));
        assert!(catalog.get(1).unwrap().has_revert());
        assert!(!catalog.get(2).unwrap().has_revert());
    }

    #[tokio::test]
    async fn test_static_loader_rejects_duplicates_and_empty_units() {
        let duplicate = StaticLoader::new(FileNameCodec::default())
            .register("1.a.migration.sql", |m| m.apply_sql("SELECT 1"))
            .register("1.b.migration.sql", |m| m.apply_sql("SELECT 1"));
        assert!(matches!(
            duplicate.load().await,
            Err(MigrationError::DuplicateSequence { .. })
        ));

        let empty = StaticLoader::new(FileNameCodec::default()).register("1.a.migration.sql", |m| m);
        assert!(matches!(
            empty.load().await,
            Err(MigrationError::InvalidUnit { .. })
        ));
    }

    #[tokio::test]
    async fn test_directory_loader() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("20240101120000.create-users.migration.sql"),
            "-- up\nCREATE TABLE users (id INT);\n-- down\nDROP TABLE users;",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("20240101130000.add-email.migration.sql"),
            "-- up\nALTER TABLE users ADD COLUMN email TEXT;",
        )
        .unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "not a migration").unwrap();
        fs::create_dir(temp_dir.path().join("1.nested.migration.sql")).unwrap();

        let loader = DirectoryLoader::new(temp_dir.path(), FileNameCodec::default());
        let catalog = loader.load().await.unwrap();

        assert_eq!(catalog.sequence_numbers(), vec![20240101120000, 20240101130000]);
        assert_eq!(catalog.at(0).unwrap().title(), "create-users");
        assert!(catalog.at(0).unwrap().has_revert());
        assert!(!catalog.at(1).unwrap().has_revert());
    }

    #[tokio::test]
    async fn test_directory_loader_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let loader = DirectoryLoader::new(temp_dir.path().join("missing"), FileNameCodec::default());
        assert!(loader.load().await.unwrap().is_empty());
    }
}
