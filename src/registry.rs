//! The migration registry: constructs the ordered descriptor catalogue.
//!
//! The registry does not execute anything. It validates version invariants at
//! load time and hands the [Runner](crate::Runner) a catalogue sorted
//! ascending by version. How descriptors are authored (unit structs
//! implementing [Migration], [SqlMigration] values, the
//! [sql_migration!](crate::sql_migration) macro) is up to the caller.

use crate::core::Migration;
use crate::error::Error;
use rusqlite::Connection;

/// An ordered, validated catalogue of migration descriptors.
pub struct Registry {
    migrations: Vec<Box<dyn Migration>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("migrations", &self.migrations)
            .finish()
    }
}

impl Registry {
    /// Build a registry from an unordered set of descriptors, validating
    /// invariants and sorting ascending by version.
    ///
    /// Fails with [Error::DuplicateVersion] if two descriptors share a
    /// version and [Error::MalformedDescriptor] for version 0.
    pub fn try_new(mut migrations: Vec<Box<dyn Migration>>) -> Result<Self, Error> {
        migrations.sort_by_key(|m| m.version());

        for (i, migration) in migrations.iter().enumerate() {
            let version = migration.version();
            if version == 0 {
                return Err(Error::MalformedDescriptor(
                    "migration version must be greater than 0, found version 0".to_string(),
                ));
            }
            if i > 0 && migrations[i - 1].version() == version {
                return Err(Error::DuplicateVersion { version });
            }
        }

        Ok(Self { migrations })
    }

    /// Build a registry, panicking if descriptors are invalid.
    /// For a non-panicking version, use [Registry::try_new].
    pub fn new(migrations: Vec<Box<dyn Migration>>) -> Self {
        match Self::try_new(migrations) {
            Ok(registry) => registry,
            Err(err) => panic!("{}", err),
        }
    }

    /// All descriptors, ascending by version.
    pub fn ordered(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    /// Look up one descriptor by version.
    pub fn get(&self, version: u64) -> Option<&dyn Migration> {
        self.migrations
            .iter()
            .find(|m| m.version() == version)
            .map(|m| m.as_ref())
    }

    /// Whether a descriptor with this version is registered.
    pub fn contains(&self, version: u64) -> bool {
        self.get(version).is_some()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// A builder for [SqlMigration].
///
/// `build()` performs the load-time malformed-descriptor check: a migration
/// with no up statement is rejected with [Error::MalformedDescriptor].
pub struct SqlMigrationBuilder {
    version: u64,
    name: String,
    up_sql: Vec<String>,
    down_sql: Option<Vec<String>>,
    transactional: bool,
}

impl SqlMigrationBuilder {
    /// Add one statement to the up body. Statements execute in the order
    /// added.
    pub fn up(mut self, sql: impl Into<String>) -> Self {
        self.up_sql.push(sql.into());
        self
    }

    /// Add one statement to the down body. Supplying any down statement marks
    /// the migration reversible.
    pub fn down(mut self, sql: impl Into<String>) -> Self {
        self.down_sql.get_or_insert_with(Vec::new).push(sql.into());
        self
    }

    /// Run this migration's statements without a wrapping transaction.
    /// Required for operations that cannot run inside one, such as concurrent
    /// index builds; the statements should then tolerate re-application.
    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    /// Finish the descriptor, failing with [Error::MalformedDescriptor] if no
    /// up statement was supplied or the version is 0.
    pub fn build(self) -> Result<SqlMigration, Error> {
        if self.version == 0 {
            return Err(Error::MalformedDescriptor(
                "migration version must be greater than 0, found version 0".to_string(),
            ));
        }
        if self.up_sql.is_empty() {
            return Err(Error::MalformedDescriptor(format!(
                "migration {} ('{}') has no up body",
                self.version, self.name
            )));
        }
        Ok(SqlMigration {
            version: self.version,
            name: self.name,
            up_sql: self.up_sql,
            down_sql: self.down_sql,
            transactional: self.transactional,
        })
    }
}

/// A migration descriptor defined by plain SQL statement lists.
///
/// For bodies that need to query data and transform it in Rust, implement
/// [Migration] directly instead.
///
/// # Example
///
/// ```
/// use stratum::SqlMigration;
///
/// let m = SqlMigration::builder(1, "create users")
///     .up("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
///     .down("DROP TABLE users")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct SqlMigration {
    version: u64,
    name: String,
    up_sql: Vec<String>,
    down_sql: Option<Vec<String>>,
    transactional: bool,
}

impl SqlMigration {
    pub fn builder(version: u64, name: impl Into<String>) -> SqlMigrationBuilder {
        SqlMigrationBuilder {
            version,
            name: name.into(),
            up_sql: Vec::new(),
            down_sql: None,
            transactional: true,
        }
    }
}

impl Migration for SqlMigration {
    fn version(&self) -> u64 {
        self.version
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn transactional(&self) -> bool {
        self.transactional
    }

    fn reversible(&self) -> bool {
        self.down_sql.is_some()
    }

    fn up(&self, conn: &Connection) -> Result<(), Error> {
        for sql in &self.up_sql {
            conn.execute_batch(sql)?;
        }
        Ok(())
    }

    fn down(&self, conn: &Connection) -> Result<(), Error> {
        match &self.down_sql {
            Some(statements) => {
                for sql in statements {
                    conn.execute_batch(sql)?;
                }
                Ok(())
            }
            None => Err(Error::Irreversible {
                version: self.version,
                name: self.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VersionOnly(u64);
    impl Migration for VersionOnly {
        fn version(&self) -> u64 {
            self.0
        }
        fn up(&self, _conn: &Connection) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn sorts_ascending_regardless_of_input_order() {
        let registry = Registry::try_new(vec![
            Box::new(VersionOnly(3)),
            Box::new(VersionOnly(1)),
            Box::new(VersionOnly(2)),
        ])
        .unwrap();
        let versions: Vec<u64> = registry.ordered().iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn gaps_are_allowed() {
        // timestamp-style versions with no contiguity
        let registry = Registry::try_new(vec![
            Box::new(VersionOnly(20240101120000)),
            Box::new(VersionOnly(20231225093045)),
        ])
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ordered()[0].version(), 20231225093045);
    }

    #[test]
    fn rejects_duplicate_versions() {
        let err = Registry::try_new(vec![
            Box::new(VersionOnly(1)),
            Box::new(VersionOnly(2)),
            Box::new(VersionOnly(2)),
        ])
        .unwrap_err();
        assert_eq!(err, Error::DuplicateVersion { version: 2 });
    }

    #[test]
    fn rejects_version_zero() {
        let err = Registry::try_new(vec![Box::new(VersionOnly(0))]).unwrap_err();
        assert!(matches!(err, Error::MalformedDescriptor(_)));
    }

    #[test]
    #[should_panic(expected = "duplicate migration version: 5")]
    fn new_panics_on_duplicates() {
        Registry::new(vec![Box::new(VersionOnly(5)), Box::new(VersionOnly(5))]);
    }

    #[test]
    fn sql_migration_requires_up_body() {
        let err = SqlMigration::builder(1, "empty").build().unwrap_err();
        assert_eq!(
            err,
            Error::MalformedDescriptor("migration 1 ('empty') has no up body".to_string())
        );
    }

    #[test]
    fn sql_migration_reversibility_follows_down_presence() {
        let up_only = SqlMigration::builder(1, "up only")
            .up("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .build()
            .unwrap();
        assert!(!up_only.reversible());

        let both = SqlMigration::builder(2, "both")
            .up("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .down("DROP TABLE t")
            .build()
            .unwrap();
        assert!(both.reversible());
    }

    #[test]
    fn sql_migration_runs_statements_in_order() {
        let m = SqlMigration::builder(1, "ordered")
            .up("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .up("INSERT INTO t (id) VALUES (1)")
            .build()
            .unwrap();
        let conn = Connection::open_in_memory().unwrap();
        m.up(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn non_transactional_flag() {
        let m = SqlMigration::builder(1, "concurrent index")
            .up("CREATE INDEX IF NOT EXISTS idx_t ON t(id)")
            .non_transactional()
            .build()
            .unwrap();
        assert!(!m.transactional());
    }
}
