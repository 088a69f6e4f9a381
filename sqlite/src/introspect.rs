//! Reads the persisted schema state the planner diffs against.
//!
//! SQLite compares table, column and index names case-insensitively, so all
//! lookups here do too.

use std::collections::BTreeMap;

use entity_store_core::SCHEMA_VERSION_TABLE;
use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;
use crate::migration::AppliedMigration;
use crate::schema::quote_ident;

/// Snapshot of the tables, columns, indexes and migration history found in
/// a database.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersistedSchema {
    /// Table name → column names, in table order.
    pub tables: BTreeMap<String, Vec<String>>,
    /// Index names.
    pub indexes: Vec<String>,
    /// Applied migrations, oldest first; `None` when the tracking table is
    /// absent.
    pub history: Option<Vec<AppliedMigration>>,
}

impl PersistedSchema {
    /// State of a database with no tables at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads tables, columns, indexes and history from `conn`.
    pub fn read(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut tables = BTreeMap::new();
        for name in names {
            let mut cols = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
            let columns: Vec<String> = cols
                .query_map([&name], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            tables.insert(name, columns);
        }

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let has_history = tables
            .keys()
            .any(|t| t.eq_ignore_ascii_case(SCHEMA_VERSION_TABLE));
        let history = if has_history {
            Some(read_history(conn)?)
        } else {
            None
        };

        Ok(Self {
            tables,
            indexes,
            history,
        })
    }

    /// Columns of `table`, or `None` if the table does not exist.
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, cols)| cols.as_slice())
    }

    /// Returns `true` if `table` exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.columns(table).is_some()
    }

    /// Returns `true` if `table` exists and has `column`.
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .is_some_and(|cols| cols.iter().any(|c| c.eq_ignore_ascii_case(column)))
    }

    /// Returns `true` if an index named `name` exists.
    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.eq_ignore_ascii_case(name))
    }

    /// Highest applied migration version, if any.
    pub fn latest_version(&self) -> Option<i64> {
        self.history
            .as_ref()
            .and_then(|h| h.iter().map(|m| m.version).max())
    }

    /// Most recently applied migration, if any.
    pub fn latest(&self) -> Option<&AppliedMigration> {
        self.history
            .as_ref()
            .and_then(|h| h.iter().max_by_key(|m| m.version))
    }
}

/// Reads the migration history, oldest first.
pub(crate) fn read_history(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT version, migration_name, provider, model_hash, step_count, applied_at \
         FROM {} ORDER BY version",
        quote_ident(SCHEMA_VERSION_TABLE)
    ))?;
    let history = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                name: row.get(1)?,
                provider: row.get(2)?,
                model_hash: row.get(3)?,
                step_count: row.get::<_, i64>(4)? as usize,
                applied_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(history)
}

/// Highest version in the tracking table; `None` if it is empty or absent.
pub(crate) fn latest_version(conn: &Connection) -> Result<Option<i64>> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        [SCHEMA_VERSION_TABLE],
        |row| Ok(row.get::<_, i64>(0)? > 0),
    )?;
    if !exists {
        return Ok(None);
    }
    let version: Option<i64> = conn.query_row(
        &format!("SELECT MAX(version) FROM {}", quote_ident(SCHEMA_VERSION_TABLE)),
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_database() {
        let conn = Connection::open_in_memory().unwrap();
        let persisted = PersistedSchema::read(&conn).unwrap();
        assert_eq!(persisted, PersistedSchema::empty());
        assert_eq!(persisted.latest_version(), None);
        assert_eq!(latest_version(&conn).unwrap(), None);
    }

    #[test]
    fn test_reads_tables_columns_and_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE \"Blogs\" (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE INDEX \"IX_Blogs_name\" ON \"Blogs\" (name);",
        )
        .unwrap();

        let persisted = PersistedSchema::read(&conn).unwrap();
        assert_eq!(
            persisted.columns("blogs").unwrap(),
            &["id".to_string(), "name".to_string()]
        );
        assert!(persisted.has_column("Blogs", "NAME"));
        assert!(!persisted.has_column("Blogs", "title"));
        assert!(!persisted.has_table("Posts"));
        assert!(persisted.has_index("ix_blogs_name"));
        assert!(persisted.history.is_none());
    }

    #[test]
    fn test_empty_tracking_table_has_no_version() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&crate::schema::tracking_table_sql()).unwrap();
        let persisted = PersistedSchema::read(&conn).unwrap();
        assert_eq!(persisted.history, Some(Vec::new()));
        assert_eq!(latest_version(&conn).unwrap(), None);
    }
}
