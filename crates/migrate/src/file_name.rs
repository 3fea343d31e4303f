//! Migration file names
//!
//! A migration is identified by a file name of the form
//! `<sequence>.<title>.migration.<ext>`, for example
//! `1700000000000.create-users.migration.sql`. The sequence number orders the
//! migrations; an epoch-millisecond timestamp avoids collisions between authors.
//! The title is optional.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MigrationError, MigrationResult};

/// Extension used when none is configured
pub const DEFAULT_EXTENSION: &str = "sql";

static FILE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<sequence>[0-9]+)\.?(?P<title>[A-Za-z0-9_-]+)?\.migration\.(?P<ext>[0-9a-z]+)$")
        .expect("migration file name pattern is a valid regex")
});

/// Components of a well-formed migration file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameParts {
    pub sequence_number: i64,
    /// Empty when the file name carries no title
    pub title: String,
    /// The lower-cased file name the parts were parsed from
    pub file_name: String,
}

/// Parses, validates and formats migration file names for one extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameCodec {
    extension: String,
}

impl FileNameCodec {
    pub fn new(extension: impl AsRef<str>) -> Self {
        Self {
            extension: extension.as_ref().trim_start_matches('.').to_lowercase(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Parse a file name into its components.
    ///
    /// The input is lower-cased before matching. Titles are limited to ASCII
    /// letters, digits, `_` and `-`.
    ///
    /// [`FileNameCodec::format_parts`] only restores canonical names: the dot
    /// after the sequence number is optional and leading zeros are accepted, so
    /// `12abc.migration.sql` and `012.abc.migration.sql` both format back as
    /// `12.abc.migration.sql`.
    pub fn parse(&self, name: &str) -> MigrationResult<FileNameParts> {
        let file_name = name.to_lowercase();
        let format_error = || MigrationError::Format {
            input: name.to_string(),
            extension: self.extension.clone(),
        };

        let captures = FILE_NAME_PATTERN
            .captures(&file_name)
            .ok_or_else(format_error)?;

        if &captures["ext"] != self.extension {
            return Err(format_error());
        }

        // Digit runs longer than an i64 are rejected as malformed
        let sequence_number = captures["sequence"]
            .parse::<i64>()
            .map_err(|_| format_error())?;
        let title = captures
            .name("title")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        Ok(FileNameParts {
            sequence_number,
            title,
            file_name,
        })
    }

    /// Non-failing form of [`FileNameCodec::parse`]
    pub fn is_well_formed(&self, name: &str) -> bool {
        self.parse(name).is_ok()
    }

    /// Build the canonical file name for a sequence number and title
    pub fn format(&self, sequence_number: i64, title: &str) -> String {
        if title.is_empty() {
            format!("{}.migration.{}", sequence_number, self.extension)
        } else {
            format!("{}.{}.migration.{}", sequence_number, title, self.extension)
        }
    }

    /// Inverse of [`FileNameCodec::parse`] for canonical names
    pub fn format_parts(&self, parts: &FileNameParts) -> String {
        self.format(parts.sequence_number, &parts.title)
    }
}

impl Default for FileNameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION)
    }
}

/// Strip any leading directories from a path-like key and return the file name
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_name() {
        let codec = FileNameCodec::default();
        let parts = codec
            .parse("1700000000000.create-users_table.migration.sql")
            .unwrap();
        assert_eq!(parts.sequence_number, 1_700_000_000_000);
        assert_eq!(parts.title, "create-users_table");
        assert_eq!(parts.file_name, "1700000000000.create-users_table.migration.sql");
    }

    #[test]
    fn test_parse_without_title() {
        let parts = FileNameCodec::default().parse("42.migration.sql").unwrap();
        assert_eq!(parts.sequence_number, 42);
        assert_eq!(parts.title, "");
    }

    #[test]
    fn test_parse_lowercases_input() {
        let parts = FileNameCodec::default()
            .parse("12.Add-Index.MIGRATION.SQL")
            .unwrap();
        assert_eq!(parts.title, "add-index");
        assert_eq!(parts.file_name, "12.add-index.migration.sql");
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        let codec = FileNameCodec::default();
        for name in [
            "invalid",
            "",
            "create-users.migration.sql",
            "12.create users.migration.sql",
            "1.café.migration.sql",
            "1.naïve-title.migration.sql",
            "12.create.sql",
            "12.create.migration.rs",
            "12.create.migration.sql.bak",
            "99999999999999999999999.too-big.migration.sql",
        ] {
            let err = codec.parse(name).unwrap_err();
            assert!(
                matches!(err, MigrationError::Format { .. }),
                "expected format error for {name}"
            );
            assert!(!codec.is_well_formed(name));
        }
    }

    #[test]
    fn test_custom_extension() {
        let codec = FileNameCodec::new(".RS");
        assert_eq!(codec.extension(), "rs");
        assert!(codec.is_well_formed("3.seed.migration.rs"));
        assert!(!codec.is_well_formed("3.seed.migration.sql"));
    }

    #[test]
    fn test_round_trip_for_canonical_names() {
        let codec = FileNameCodec::default();
        for name in [
            "1.migration.sql",
            "1.a.migration.sql",
            "1700000000000.create-users.migration.sql",
            "20240101120000.add_email_index.migration.sql",
        ] {
            let parts = codec.parse(name).unwrap();
            assert_eq!(codec.format_parts(&parts), name);
        }
    }

    #[test]
    fn test_non_canonical_names_format_canonically() {
        let codec = FileNameCodec::default();
        for (name, canonical) in [
            ("12abc.migration.sql", "12.abc.migration.sql"),
            ("012.abc.migration.sql", "12.abc.migration.sql"),
            ("7.Seed.Migration.SQL", "7.seed.migration.sql"),
        ] {
            let parts = codec.parse(name).unwrap();
            assert_eq!(codec.format_parts(&parts), canonical);
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("./db/1.a.migration.sql"), "1.a.migration.sql");
        assert_eq!(base_name("1.a.migration.sql"), "1.a.migration.sql");
        assert_eq!(base_name("c:\\db\\2.b.migration.sql"), "2.b.migration.sql");
    }
}
