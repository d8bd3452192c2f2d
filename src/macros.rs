//! Convenience macros for defining migrations.

/// Define a simple SQL-only migration.
///
/// This macro reduces boilerplate for migrations that consist of plain SQL
/// statements with no Rust logic.
///
/// # Basic Usage
///
/// ```
/// use stratum::sql_migration;
///
/// // Define a migration struct with SQL
/// sql_migration!(CreateUsersTable, 1, "create-users-table",
///     up: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
///     down: "DROP TABLE users"
/// );
/// ```
///
/// This expands to a struct `CreateUsersTable` that implements the
/// [`Migration`](crate::Migration) trait. Providing a `down` clause makes the
/// migration reversible; omitting it leaves `reversible()` false and any
/// rollback through it fails with [`Error::Irreversible`](crate::Error).
///
/// # Up-Only Migrations
///
/// If your migration doesn't need a `down` implementation (common for
/// production systems), omit the `down` clause:
///
/// ```
/// use stratum::sql_migration;
///
/// sql_migration!(CreateUsersTable, 1, "create-users-table",
///     up: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"
/// );
/// ```
///
/// # Multiple Statements
///
/// For migrations with multiple SQL statements, use an array:
///
/// ```
/// use stratum::sql_migration;
///
/// sql_migration!(InitialSchema, 1, "create-initial-schema",
///     up: [
///         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
///         "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT)",
///         "CREATE INDEX idx_posts_user ON posts(user_id)"
///     ],
///     down: [
///         "DROP INDEX idx_posts_user",
///         "DROP TABLE posts",
///         "DROP TABLE users"
///     ]
/// );
/// ```
///
/// # Non-Transactional Migrations
///
/// Statements that cannot run inside a transaction (PRAGMA changes, VACUUM)
/// can opt out of the wrapping transaction with the `non_transactional`
/// keyword before the `up` clause:
///
/// ```
/// use stratum::sql_migration;
///
/// sql_migration!(EnableWal, 2, "enable-wal",
///     non_transactional,
///     up: "PRAGMA journal_mode = WAL"
/// );
/// ```
///
/// A failure partway through a non-transactional migration surfaces as
/// [`Error::PartialApplication`](crate::Error) rather than rolling back.
///
/// # When to Use This Macro
///
/// Use `sql_migration!` when your migration is pure SQL. For migrations that
/// need to query data, transform it in Rust, and write it back, implement the
/// [`Migration`](crate::Migration) trait directly instead.
#[macro_export]
macro_rules! sql_migration {
    // Pattern 1a: up/down (arrays of statements)
    ($name:ident, $version:expr, $migration_name:expr,
        up: [$($up_sql:expr),* $(,)?],
        down: [$($down_sql:expr),* $(,)?]
    ) => {
        $crate::__sql_migration_impl!($name, $version, $migration_name,
            transactional: true,
            up: [$($up_sql),*],
            down: [$($down_sql),*]
        );
    };

    // Pattern 1b: up/down (single statements)
    ($name:ident, $version:expr, $migration_name:expr,
        up: $up_sql:expr,
        down: $down_sql:expr
    ) => {
        $crate::__sql_migration_impl!($name, $version, $migration_name,
            transactional: true,
            up: [$up_sql],
            down: [$down_sql]
        );
    };

    // Pattern 2a: up only (array)
    ($name:ident, $version:expr, $migration_name:expr,
        up: [$($up_sql:expr),* $(,)?]
    ) => {
        $crate::__sql_migration_impl_no_down!($name, $version, $migration_name,
            transactional: true,
            up: [$($up_sql),*]
        );
    };

    // Pattern 2b: up only (single statement)
    ($name:ident, $version:expr, $migration_name:expr,
        up: $up_sql:expr
    ) => {
        $crate::__sql_migration_impl_no_down!($name, $version, $migration_name,
            transactional: true,
            up: [$up_sql]
        );
    };

    // Pattern 3a: non-transactional up/down (arrays)
    ($name:ident, $version:expr, $migration_name:expr,
        non_transactional,
        up: [$($up_sql:expr),* $(,)?],
        down: [$($down_sql:expr),* $(,)?]
    ) => {
        $crate::__sql_migration_impl!($name, $version, $migration_name,
            transactional: false,
            up: [$($up_sql),*],
            down: [$($down_sql),*]
        );
    };

    // Pattern 3b: non-transactional up/down (single statements)
    ($name:ident, $version:expr, $migration_name:expr,
        non_transactional,
        up: $up_sql:expr,
        down: $down_sql:expr
    ) => {
        $crate::__sql_migration_impl!($name, $version, $migration_name,
            transactional: false,
            up: [$up_sql],
            down: [$down_sql]
        );
    };

    // Pattern 4a: non-transactional up only (array)
    ($name:ident, $version:expr, $migration_name:expr,
        non_transactional,
        up: [$($up_sql:expr),* $(,)?]
    ) => {
        $crate::__sql_migration_impl_no_down!($name, $version, $migration_name,
            transactional: false,
            up: [$($up_sql),*]
        );
    };

    // Pattern 4b: non-transactional up only (single statement)
    ($name:ident, $version:expr, $migration_name:expr,
        non_transactional,
        up: $up_sql:expr
    ) => {
        $crate::__sql_migration_impl_no_down!($name, $version, $migration_name,
            transactional: false,
            up: [$up_sql]
        );
    };
}

/// Internal implementation macro with a down body.
#[macro_export]
#[doc(hidden)]
macro_rules! __sql_migration_impl {
    ($name:ident, $version:expr, $migration_name:expr,
        transactional: $transactional:expr,
        up: [$($up_sql:expr),*],
        down: [$($down_sql:expr),*]
    ) => {
        pub struct $name;

        impl $crate::Migration for $name {
            fn version(&self) -> u64 {
                $version
            }

            fn name(&self) -> String {
                $migration_name.to_string()
            }

            fn transactional(&self) -> bool {
                $transactional
            }

            fn reversible(&self) -> bool {
                true
            }

            fn up(&self, conn: &::rusqlite::Connection) -> Result<(), $crate::Error> {
                $(conn.execute_batch($up_sql)?;)*
                Ok(())
            }

            fn down(&self, conn: &::rusqlite::Connection) -> Result<(), $crate::Error> {
                $(conn.execute_batch($down_sql)?;)*
                Ok(())
            }
        }
    };
}

/// Internal implementation macro without a down body.
#[macro_export]
#[doc(hidden)]
macro_rules! __sql_migration_impl_no_down {
    ($name:ident, $version:expr, $migration_name:expr,
        transactional: $transactional:expr,
        up: [$($up_sql:expr),*]
    ) => {
        pub struct $name;

        impl $crate::Migration for $name {
            fn version(&self) -> u64 {
                $version
            }

            fn name(&self) -> String {
                $migration_name.to_string()
            }

            fn transactional(&self) -> bool {
                $transactional
            }

            fn up(&self, conn: &::rusqlite::Connection) -> Result<(), $crate::Error> {
                $(conn.execute_batch($up_sql)?;)*
                Ok(())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{Error, Migration, Runner};
    use rusqlite::Connection;

    #[test]
    fn test_macro_compiles_with_down() {
        sql_migration!(TestMigration1, 1, "test-migration",
            up: "CREATE TABLE test (id INTEGER PRIMARY KEY)",
            down: "DROP TABLE test"
        );

        let m = TestMigration1;
        assert_eq!(m.version(), 1);
        assert_eq!(m.name(), "test-migration");
        assert!(m.reversible());
        assert!(m.transactional());
    }

    #[test]
    fn test_macro_compiles_up_only() {
        sql_migration!(TestMigration2, 2, "test-migration-2",
            up: "CREATE TABLE test2 (id INTEGER PRIMARY KEY)"
        );

        let m = TestMigration2;
        assert_eq!(m.version(), 2);
        assert!(!m.reversible());

        let conn = Connection::open_in_memory().unwrap();
        let result = m.down(&conn);
        assert!(matches!(result, Err(Error::Irreversible { version: 2, .. })));
    }

    #[test]
    fn test_macro_compiles_non_transactional() {
        sql_migration!(TestMigration3, 3, "test-migration-3",
            non_transactional,
            up: "CREATE TABLE test3 (id INTEGER PRIMARY KEY)"
        );

        let m = TestMigration3;
        assert!(!m.transactional());
        assert!(!m.reversible());
    }

    #[test]
    fn test_macro_runtime() {
        sql_migration!(CreateUsers, 1, "create-users",
            up: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
            down: "DROP TABLE users"
        );

        sql_migration!(CreatePosts, 2, "create-posts",
            up: [
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT)",
                "CREATE INDEX idx_posts_user ON posts(user_id)"
            ],
            down: [
                "DROP INDEX idx_posts_user",
                "DROP TABLE posts"
            ]
        );

        let runner = Runner::new(vec![Box::new(CreateUsers), Box::new(CreatePosts)]);
        let mut conn = Connection::open_in_memory().unwrap();

        let report = runner.run_pending(&mut conn).unwrap();
        assert_eq!(report.applied_versions(), vec![1, 2]);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_stratum_%' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(tables, vec!["posts", "users"]);

        let report = runner.rollback_to(&mut conn, 0).unwrap();
        assert_eq!(report.applied_versions(), vec![2, 1]);
    }
}
