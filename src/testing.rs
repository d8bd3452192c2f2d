//! Testing utilities for migration development and verification.
//!
//! This module provides a test harness for writing comprehensive migration
//! tests, including data transformation tests, schema validation, and
//! reversibility checks.

use crate::{Error, Runner};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A test harness for migration testing that provides state control and assertion helpers.
///
/// # Example
///
/// ```
/// use stratum::testing::MigrationTestHarness;
/// use stratum::{Migration, Runner, Error};
/// use rusqlite::Connection;
///
/// struct Migration1;
/// impl Migration for Migration1 {
///     fn version(&self) -> u64 { 1 }
///     fn up(&self, conn: &Connection) -> Result<(), Error> {
///         conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", [])?;
///         Ok(())
///     }
///     fn down(&self, conn: &Connection) -> Result<(), Error> {
///         conn.execute("DROP TABLE users", [])?;
///         Ok(())
///     }
///     fn reversible(&self) -> bool { true }
/// }
///
/// # fn test() -> Result<(), Error> {
/// let mut harness = MigrationTestHarness::new(Runner::new(vec![Box::new(Migration1)]));
///
/// // Migrate to version 1
/// harness.migrate_to(1)?;
///
/// // Insert test data
/// harness.execute("INSERT INTO users VALUES (1, 'alice')")?;
///
/// // Assert table exists
/// harness.assert_table_exists("users")?;
///
/// // Query data
/// let name: String = harness.query_one("SELECT name FROM users WHERE id = 1")?;
/// assert_eq!(name, "alice");
/// # Ok(())
/// # }
/// ```
pub struct MigrationTestHarness {
    conn: Connection,
    runner: Runner,
}

/// Represents a captured database schema for comparison and snapshotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Map of table name to table definitions
    pub tables: HashMap<String, TableSchema>,
}

/// Represents a table's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// SQL CREATE statement for the table
    pub sql: String,
    /// List of columns
    pub columns: Vec<ColumnInfo>,
    /// List of indexes
    pub indexes: Vec<IndexInfo>,
}

/// Information about a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

/// Information about an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    pub sql: String,
}

impl MigrationTestHarness {
    /// Create a new test harness with the given runner.
    /// This should be the same runner configuration that is used in the
    /// production environment: as it changes, asserts on previous migrations
    /// SHOULD NOT CHANGE.
    ///
    /// It is recommended to have a function somewhere that constructs the runner, eg:
    /// ```ignore
    /// fn runner() -> Runner {
    ///     Runner::new(vec![
    ///         Box::new(Migration1),
    ///         Box::new(Migration2),
    ///     ])
    /// }
    /// ```
    ///
    /// and then in each test, construct the harness like:
    /// ```ignore
    /// let harness = MigrationTestHarness::new(runner());
    /// ```
    ///
    /// Uses an in-memory SQLite database by default.
    pub fn new(runner: Runner) -> Self {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory test database");
        Self { conn, runner }
    }

    /// Create a test harness with a custom connection.
    /// Useful for testing with file-based databases or custom settings.
    ///
    /// See [MigrationTestHarness::new] for more information.
    pub fn with_connection(conn: Connection, runner: Runner) -> Self {
        Self { conn, runner }
    }

    /// Migrate to a specific version, applying or reversing as needed.
    /// Pass 0 to reverse everything.
    ///
    /// Returns an error if the target version does not exist in the migration list.
    pub fn migrate_to(&mut self, target_version: u64) -> Result<(), Error> {
        if target_version > 0 && !self.runner.registry().contains(target_version) {
            return Err(Error::Generic(format!(
                "migration version {} does not exist. Available versions: {}",
                target_version,
                self.runner
                    .registry()
                    .ordered()
                    .iter()
                    .map(|m| m.version().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let current = self.current_version()?;

        if target_version > current {
            self.runner.run_to(&mut self.conn, target_version)?;
        } else if target_version < current {
            self.runner.rollback_to(&mut self.conn, target_version)?;
        }

        Ok(())
    }

    /// Migrate up by exactly one migration: the lowest pending version.
    ///
    /// Returns an error if nothing is pending.
    pub fn migrate_up_one(&mut self) -> Result<(), Error> {
        let status = self.runner.status(&mut self.conn)?;
        let next = status
            .pending
            .first()
            .map(|p| p.version)
            .ok_or_else(|| Error::Generic("no pending migrations to apply".to_string()))?;
        self.runner.run_to(&mut self.conn, next)?;
        Ok(())
    }

    /// Migrate down by exactly one migration.
    pub fn migrate_down_one(&mut self) -> Result<(), Error> {
        let current = self.current_version()?;
        if current == 0 {
            return Err(Error::Generic(
                "already at version 0, cannot migrate down".to_string(),
            ));
        }

        self.runner.rollback_steps(&mut self.conn, 1)?;
        Ok(())
    }

    /// Get the current (highest applied) migration version.
    pub fn current_version(&mut self) -> Result<u64, Error> {
        self.runner.latest_version(&mut self.conn)
    }

    /// Execute a SQL statement (for setting up test data).
    pub fn execute(&mut self, sql: &str) -> Result<(), Error> {
        self.conn.execute(sql, [])?;
        Ok(())
    }

    /// Query a single value from the database.
    pub fn query_one<T>(&mut self, sql: &str) -> Result<T, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let result = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(result)
    }

    /// Query all values from a single-column result.
    pub fn query_all<T>(&mut self, sql: &str) -> Result<Vec<T>, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let results = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<T>, _>>()?;
        Ok(results)
    }

    /// Query with a custom row mapper.
    pub fn query_map<T, F>(&mut self, sql: &str, f: F) -> Result<Vec<T>, Error>
    where
        F: FnMut(&Row) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let results = stmt.query_map([], f)?.collect::<Result<Vec<T>, _>>()?;
        Ok(results)
    }

    /// Assert that a table exists in the database.
    pub fn assert_table_exists(&mut self, table_name: &str) -> Result<(), Error> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;

        if count == 0 {
            return Err(Error::Generic(format!(
                "table '{}' does not exist",
                table_name
            )));
        }

        Ok(())
    }

    /// Assert that a table does not exist in the database.
    pub fn assert_table_not_exists(&mut self, table_name: &str) -> Result<(), Error> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;

        if count > 0 {
            return Err(Error::Generic(format!(
                "table '{}' exists but should not",
                table_name
            )));
        }

        Ok(())
    }

    /// Assert that a column exists in a table.
    pub fn assert_column_exists(
        &mut self,
        table_name: &str,
        column_name: &str,
    ) -> Result<(), Error> {
        let columns = self.get_columns(table_name)?;

        if !columns.iter().any(|c| c.name == column_name) {
            return Err(Error::Generic(format!(
                "column '{}' does not exist in table '{}'",
                column_name, table_name
            )));
        }

        Ok(())
    }

    /// Assert that an index exists.
    pub fn assert_index_exists(&mut self, index_name: &str) -> Result<(), Error> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
            [index_name],
            |row| row.get(0),
        )?;

        if count == 0 {
            return Err(Error::Generic(format!(
                "index '{}' does not exist",
                index_name
            )));
        }

        Ok(())
    }

    /// Capture the current database schema as a snapshot.
    ///
    /// Excludes SQLite internal tables, the version ledger, and the run lock
    /// table, so snapshots compare only user schema.
    pub fn capture_schema(&mut self) -> Result<SchemaSnapshot, Error> {
        let mut tables = HashMap::new();

        let lock_table = format!("{}lock_", crate::DEFAULT_LEDGER_TABLE_NAME);
        let table_names: Vec<String> = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != ?1 AND name != ?2")?
            .query_map(
                [crate::DEFAULT_LEDGER_TABLE_NAME, lock_table.as_str()],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        for table_name in table_names {
            let sql: String = self.conn.query_row(
                "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
                [&table_name],
                |row| row.get(0),
            )?;

            // Normalize SQL to avoid quoting differences
            let normalized_sql = sql.replace("\"", "");

            let columns = self.get_columns(&table_name)?;
            let indexes = self.get_indexes(&table_name)?;

            tables.insert(
                table_name,
                TableSchema {
                    sql: normalized_sql,
                    columns,
                    indexes,
                },
            );
        }

        Ok(SchemaSnapshot { tables })
    }

    /// Assert that the current schema matches a previously captured snapshot.
    pub fn assert_schema_matches(&mut self, expected: &SchemaSnapshot) -> Result<(), Error> {
        let actual = self.capture_schema()?;

        if actual != *expected {
            return Err(Error::Generic(format!(
                "schema mismatch.\nExpected: {:#?}\nActual: {:#?}",
                expected, actual
            )));
        }

        Ok(())
    }

    /// Get column information for a table.
    fn get_columns(&mut self, table_name: &str) -> Result<Vec<ColumnInfo>, Error> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", table_name))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    type_name: row.get(2)?,
                    not_null: row.get::<_, i32>(3)? != 0,
                    default_value: row.get(4)?,
                    primary_key: row.get::<_, i32>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(columns)
    }

    /// Get index information for a table.
    fn get_indexes(&mut self, table_name: &str) -> Result<Vec<IndexInfo>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT name, \"unique\", sql FROM sqlite_master WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL"
        )?;

        let indexes = stmt
            .query_map([table_name], |row| {
                Ok(IndexInfo {
                    name: row.get(0)?,
                    unique: row.get::<_, i32>(1)? != 0,
                    sql: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(indexes)
    }

    /// Get a reference to the underlying connection for advanced usage.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
