//! SQL for the catalog table

use crate::backend::HistoryTable;

/// Rows per INSERT; five parameters each stays well below the protocol limit
pub const INSERT_CHUNK_SIZE: usize = 1000;

/// Escape an identifier for PostgreSQL
///
/// ```
/// use elif_migrate::postgres::sql::escape_identifier;
///
/// assert_eq!(escape_identifier("migrations"), "\"migrations\"");
/// assert_eq!(escape_identifier("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn escape_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified_table(table: &HistoryTable) -> String {
    format!(
        "{}.{}",
        escape_identifier(&table.schema),
        escape_identifier(&table.table)
    )
}

/// Bound to [`qualified_table`]; `to_regclass` yields NULL for a missing
/// schema or table instead of failing
pub const TABLE_EXISTS_SQL: &str = "SELECT to_regclass($1) IS NOT NULL";

pub fn create_schema_sql(table: &HistoryTable) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", escape_identifier(&table.schema))
}

pub fn create_table_sql(table: &HistoryTable) -> String {
    let primary_key = escape_identifier(&format!("pk_{}_migration_log", table.schema));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         sequence_number BIGINT NOT NULL, \
         file_name TEXT NOT NULL, \
         direction TEXT NOT NULL, \
         description TEXT, \
         duration INT DEFAULT 0, \
         created_at TIMESTAMPTZ DEFAULT NOW(), \
         CONSTRAINT {} PRIMARY KEY (sequence_number))",
        qualified_table(table),
        primary_key
    )
}

pub fn latest_sequence_sql(table: &HistoryTable) -> String {
    format!(
        "SELECT MAX(sequence_number) FROM {} WHERE direction = 'up'",
        qualified_table(table)
    )
}

const COLUMNS: &str = "sequence_number, file_name, direction, description, duration, created_at";

pub fn list_all_sql(table: &HistoryTable) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY sequence_number ASC",
        COLUMNS,
        qualified_table(table)
    )
}

pub fn find_by_file_name_sql(table: &HistoryTable) -> String {
    format!(
        "SELECT {} FROM {} WHERE file_name = $1 LIMIT 1",
        COLUMNS,
        qualified_table(table)
    )
}

/// Upsert of `rows` history rows keyed by sequence number
pub fn insert_sql(table: &HistoryTable, rows: usize) -> String {
    let values: Vec<String> = (0..rows)
        .map(|row| {
            let base = row * 5;
            format!(
                "(${}, ${}, ${}, ${}, ${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5
            )
        })
        .collect();

    format!(
        "INSERT INTO {} (sequence_number, file_name, direction, description, duration) \
         VALUES {} \
         ON CONFLICT (sequence_number) DO UPDATE SET \
         file_name = EXCLUDED.file_name, \
         direction = EXCLUDED.direction, \
         description = EXCLUDED.description, \
         duration = EXCLUDED.duration, \
         created_at = NOW()",
        qualified_table(table),
        values.join(", ")
    )
}
