#![cfg_attr(docsrs, feature(doc_cfg))]
//! `stratum` is a lightweight library for managing SQLite schema migrations.
//!
//! Core concepts:
//! - `stratum` supplies migration definitions with a live connection to the database, allowing more expressive migration logic than just preparing SQL statements.
//! - `stratum` is a code-first library, making embedding it in your application easier than CLI-first tools.
//! - Versions are arbitrary increasing integers (timestamps work well); the pending set is the difference between the registered migrations and the applied ledger, so a migration merged late with a lower version than an already-applied one still runs.
//!
//! # Usage
//!
//! ```
//! use stratum::{Migration, Runner, Error};
//! use rusqlite::Connection;
//!
//! // define your migrations as structs that implement the Migration trait
//! struct CreateUsers;
//!
//! impl Migration for CreateUsers {
//!     fn version(&self) -> u64 {
//!         20240101
//!     }
//!     fn name(&self) -> String {
//!         "create-users".to_string()
//!     }
//!     fn up(&self, conn: &Connection) -> Result<(), Error> {
//!         conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", [])?;
//!         Ok(())
//!     }
//!     fn down(&self, conn: &Connection) -> Result<(), Error> {
//!         conn.execute("DROP TABLE users", [])?;
//!         Ok(())
//!     }
//!     fn reversible(&self) -> bool {
//!         true
//!     }
//! }
//!
//! struct AddEmailColumn;
//!
//! impl Migration for AddEmailColumn {
//!     fn version(&self) -> u64 {
//!         20240215
//!     }
//!     fn name(&self) -> String {
//!         "add-email-column".to_string()
//!     }
//!     fn up(&self, conn: &Connection) -> Result<(), Error> {
//!         conn.execute("ALTER TABLE users ADD COLUMN email TEXT", [])?;
//!         Ok(())
//!     }
//! }
//!
//! // construct a runner with all migrations
//! let runner = Runner::new(vec![Box::new(CreateUsers), Box::new(AddEmailColumn)]);
//!
//! // connect to your database and apply whatever is pending,
//! // receiving a report of the results
//! let mut conn = Connection::open_in_memory().unwrap();
//! let report = runner.run_pending(&mut conn).unwrap();
//! assert!(report.success());
//! assert_eq!(report.applied_versions(), vec![20240101, 20240215]);
//!
//! // running again is a no-op
//! let report = runner.run_pending(&mut conn).unwrap();
//! assert!(report.outcomes.is_empty());
//! ```
//!
//! # Live connections
//!
//! A migration body receives a live `&Connection`, so it can query data,
//! transform it in Rust, and write it back, rather than being limited to
//! what SQL alone can express. For migrations that are pure SQL, the
//! [sql_migration!] macro removes the boilerplate.
//!
//! # Transactions and partial application
//!
//! By default each migration runs inside its own transaction: on failure the
//! database is left exactly as it was before that migration started. A
//! migration whose statements cannot run transactionally (PRAGMA changes,
//! VACUUM) can override [Migration::transactional] to return false; a failure
//! partway through such a body is reported as [Error::PartialApplication] so
//! it is never mistaken for a clean rollback.
//!
//! # Rollback
//!
//! A migration is reversible only if it overrides [Migration::reversible] to
//! return true and provides a [Migration::down] body. [Runner::rollback_to]
//! reverses applied migrations in descending order; hitting an irreversible
//! migration halts the rollback with [Error::Irreversible] before anything is
//! mutated for that step. Inspect reversibility ahead of time with
//! [Runner::status].
//!
//! # Safety
//!
//! Concurrent runs against the same database are excluded by an advisory lock
//! held for the duration of a run; a second runner fails fast with
//! [Error::LockContention]. Applied migrations are checksummed, so editing a
//! migration after it has been applied is detected and reported.
//!
//! # Benefits
//! - Easy adoption from other migration tools or no migration tool.
//! - Robust error handling and rollback support (when available).
//! - Gap-filling pending detection across merged branches.
//! - Migration history and status querying.
//! - Run deadlines and cooperative cancellation.
//! - Observability hooks.
//! - Tracing integration - available with the `tracing` feature flag.
//! - Testing utilities - available with the `testing` feature flag.

mod core;
pub use crate::core::{Direction, Migration, Precondition, DEFAULT_LEDGER_TABLE_NAME};

mod error;
pub use error::Error;

#[macro_use]
mod macros;

mod executor;
mod ledger;
mod lock;

mod registry;
pub use registry::{Registry, SqlMigration, SqlMigrationBuilder};

mod report;
pub use report::{
    LedgerEntry, PendingMigration, RunOutcome, RunReport, RunStatus, StatusReport,
};

mod runner;
pub use runner::{CancelToken, Runner};

#[cfg(feature = "testing")]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;
