//! The executor: runs one migration body in the correct transactional scope
//! and reports the outcome. It never touches the ledger - that separation
//! belongs to the runner.

use crate::core::{Direction, Migration, Precondition};
use crate::error::Error;
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// How one body execution concluded on the success path.
#[derive(Debug, PartialEq)]
pub(crate) enum Execution {
    /// The body ran to completion.
    Ran(Duration),
    /// The precondition reported the changes already present; the body was
    /// not run and the version should be stamped as applied.
    Stamped,
}

/// Apply one migration body in the given direction.
///
/// For `Direction::Down` on a descriptor with `reversible() == false` this
/// fails with [Error::Irreversible] before touching the database.
///
/// Transactional descriptors run inside a single transaction: committed on
/// success, rolled back entirely on any error, so a schema change and its
/// accompanying data backfill are all-or-nothing. Non-transactional
/// descriptors run against the bare connection; a failure partway leaves the
/// database in whatever state the body reached and is surfaced as
/// [Error::PartialApplication] so nobody mistakes it for a rollback.
pub(crate) fn execute(
    conn: &mut Connection,
    migration: &dyn Migration,
    direction: Direction,
) -> Result<Execution, Error> {
    if direction == Direction::Down && !migration.reversible() {
        return Err(Error::Irreversible {
            version: migration.version(),
            name: migration.name(),
        });
    }

    let start = Instant::now();

    if migration.transactional() {
        let tx = conn.transaction()?;

        if direction == Direction::Up {
            match migration.precondition(&tx)? {
                Precondition::AlreadySatisfied => {
                    tx.commit()?;
                    return Ok(Execution::Stamped);
                }
                Precondition::NeedsApply => {}
            }
        }

        let result = match direction {
            Direction::Up => migration.up(&tx),
            Direction::Down => migration.down(&tx),
        };
        match result {
            Ok(()) => {
                tx.commit()?;
                Ok(Execution::Ran(start.elapsed()))
            }
            // Transaction rolls back when dropped
            Err(e) => Err(e),
        }
    } else {
        if direction == Direction::Up {
            match migration.precondition(conn)? {
                Precondition::AlreadySatisfied => return Ok(Execution::Stamped),
                Precondition::NeedsApply => {}
            }
        }

        let result = match direction {
            Direction::Up => migration.up(conn),
            Direction::Down => migration.down(conn),
        };
        match result {
            Ok(()) => Ok(Execution::Ran(start.elapsed())),
            Err(e) => Err(Error::PartialApplication {
                version: migration.version(),
                name: migration.name(),
                source: Box::new(e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CreateThenFail;
    impl Migration for CreateThenFail {
        fn version(&self) -> u64 {
            1
        }
        fn up(&self, conn: &Connection) -> Result<(), Error> {
            conn.execute("CREATE TABLE t1 (id INTEGER PRIMARY KEY)", [])?;
            conn.execute("bleep blorp", [])?;
            Ok(())
        }
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count > 0
    }

    #[test]
    fn transactional_failure_rolls_back_everything() {
        let mut conn = Connection::open_in_memory().unwrap();
        let err = execute(&mut conn, &CreateThenFail, Direction::Up).unwrap_err();
        assert!(matches!(err, Error::Sqlite(_)));
        assert!(!table_exists(&conn, "t1"));
    }

    #[test]
    fn non_transactional_failure_is_partial_application() {
        struct NonTx;
        impl Migration for NonTx {
            fn version(&self) -> u64 {
                1
            }
            fn name(&self) -> String {
                "concurrent work".to_string()
            }
            fn transactional(&self) -> bool {
                false
            }
            fn up(&self, conn: &Connection) -> Result<(), Error> {
                conn.execute("CREATE TABLE IF NOT EXISTS t1 (id INTEGER PRIMARY KEY)", [])?;
                conn.execute("bleep blorp", [])?;
                Ok(())
            }
        }

        let mut conn = Connection::open_in_memory().unwrap();
        let err = execute(&mut conn, &NonTx, Direction::Up).unwrap_err();
        match err {
            Error::PartialApplication { version, name, .. } => {
                assert_eq!(version, 1);
                assert_eq!(name, "concurrent work");
            }
            other => panic!("expected PartialApplication, got {:?}", other),
        }
        // the first statement's effect persists: no wrapping transaction
        assert!(table_exists(&conn, "t1"));
    }

    #[test]
    fn down_on_irreversible_fails_before_touching_db() {
        struct WitnessedDown;
        impl Migration for WitnessedDown {
            fn version(&self) -> u64 {
                2
            }
            fn up(&self, conn: &Connection) -> Result<(), Error> {
                conn.execute("CREATE TABLE t2 (id INTEGER PRIMARY KEY)", [])?;
                Ok(())
            }
            // reversible() deliberately left false; down() would mutate
            fn down(&self, conn: &Connection) -> Result<(), Error> {
                conn.execute("DROP TABLE t2", [])?;
                Ok(())
            }
        }

        let mut conn = Connection::open_in_memory().unwrap();
        execute(&mut conn, &WitnessedDown, Direction::Up).unwrap();
        assert!(table_exists(&conn, "t2"));

        let err = execute(&mut conn, &WitnessedDown, Direction::Down).unwrap_err();
        assert_eq!(
            err,
            Error::Irreversible {
                version: 2,
                name: "migration 2".to_string()
            }
        );
        // the declared-irreversible down body never ran
        assert!(table_exists(&conn, "t2"));
    }

    #[test]
    fn precondition_already_satisfied_stamps_without_running_up() {
        struct Adopted;
        impl Migration for Adopted {
            fn version(&self) -> u64 {
                1
            }
            fn up(&self, _conn: &Connection) -> Result<(), Error> {
                panic!("up() must not run when precondition is satisfied");
            }
            fn precondition(&self, _conn: &Connection) -> Result<Precondition, Error> {
                Ok(Precondition::AlreadySatisfied)
            }
        }

        let mut conn = Connection::open_in_memory().unwrap();
        let execution = execute(&mut conn, &Adopted, Direction::Up).unwrap();
        assert_eq!(execution, Execution::Stamped);
    }

    #[test]
    fn successful_run_reports_duration() {
        struct Quick;
        impl Migration for Quick {
            fn version(&self) -> u64 {
                1
            }
            fn up(&self, conn: &Connection) -> Result<(), Error> {
                conn.execute("CREATE TABLE q (id INTEGER PRIMARY KEY)", [])?;
                Ok(())
            }
        }

        let mut conn = Connection::open_in_memory().unwrap();
        match execute(&mut conn, &Quick, Direction::Up).unwrap() {
            Execution::Ran(_) => {}
            Execution::Stamped => panic!("body should have run"),
        }
    }
}
