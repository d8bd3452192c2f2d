use crate::error::Error;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

/// The default name of the table where applied versions are recorded.
pub const DEFAULT_LEDGER_TABLE_NAME: &str = "_stratum_ledger_";

/// Which body of a migration the executor should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Represents the result of a migration precondition check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Precondition {
    /// The migration's changes are already present in the database and should
    /// be stamped into the ledger without running up().
    AlreadySatisfied,
    /// The migration needs to be applied by running up().
    NeedsApply,
}

/// A trait that must be implemented to define a migration.
///
/// The `version` value must be unique among all migrations supplied to a
/// [Registry](crate::Registry), greater than 0, and sortable: the engine
/// applies migrations in strictly ascending version order and reverses them
/// in strictly descending order. Timestamp-derived versions such as
/// `20240101120000` work fine; versions do not need to be contiguous, because
/// the pending set is computed as a set difference against the ledger rather
/// than as a high-water mark.
pub trait Migration {
    /// Returns the version number of this migration.
    ///
    /// # IMPORTANT WARNING
    ///
    /// **Once a migration has been applied to any database, its version number
    /// must NEVER be changed.** The version is the key under which application
    /// is tracked in the ledger. Changing it makes the ledger and the registry
    /// disagree about what has run.
    ///
    /// # Requirements
    ///
    /// - Must be greater than 0
    /// - Must be unique across all migrations
    /// - Must be immutable once the migration is applied to any database
    fn version(&self) -> u64;

    /// Returns the name of this migration.
    ///
    /// The name is included in the checksum used to verify migration
    /// integrity, so like the version it must not change once the migration
    /// has been applied anywhere. The default implementation returns
    /// "migration {version}".
    fn name(&self) -> String {
        format!("migration {}", self.version())
    }

    /// Returns an optional description of what this migration does.
    ///
    /// Unlike `version()` and `name()`, the description can be changed at any
    /// time as it is not used for tracking or validation.
    fn description(&self) -> Option<&'static str> {
        None
    }

    /// Whether this migration's body must run wrapped in a single atomic
    /// transaction. Defaults to `true`.
    ///
    /// Return `false` for bodies that cannot run inside a transaction, such
    /// as concurrent index builds. In that mode a failure partway leaves the
    /// database in whatever partial state the body reached; the engine
    /// surfaces this as [Error::PartialApplication] and does not record the
    /// version, so a re-run will attempt the same body again. **Bodies with
    /// `transactional() == false` must therefore be written to tolerate
    /// re-application** (e.g. `CREATE INDEX IF NOT EXISTS`). That
    /// responsibility sits with the migration author; the engine cannot
    /// guess it.
    fn transactional(&self) -> bool {
        true
    }

    /// Whether this migration declares a down body. Defaults to `false`.
    ///
    /// Irreversibility is a static, inspectable property: the reversal
    /// controller checks this flag and fails fast with [Error::Irreversible]
    /// before executing anything, rather than discovering mid-rollback that a
    /// body throws. Implementations that override [Migration::down] must also
    /// override this to return `true`.
    fn reversible(&self) -> bool {
        false
    }

    /// Execute the migration's "up" logic.
    ///
    /// For transactional migrations the connection is a live transaction
    /// handle (committed by the executor on success, rolled back on any
    /// error); for non-transactional migrations it is the bare connection.
    /// Either way the body can query data, transform it in Rust, and write it
    /// back - it is treated as an opaque unit with a single success/failure
    /// outcome. Statements execute in the literal sequence authored.
    fn up(&self, conn: &Connection) -> Result<(), Error>;

    /// Rollback this migration. Optional; the default returns
    /// [Error::Irreversible].
    fn down(&self, _conn: &Connection) -> Result<(), Error> {
        Err(Error::Irreversible {
            version: self.version(),
            name: self.name(),
        })
    }

    /// Optional precondition check, called before running `up()` during a
    /// forward run.
    ///
    /// If this returns [Precondition::AlreadySatisfied], the migration is
    /// stamped into the ledger without running `up()` - useful when adopting
    /// stratum over a database previously managed by another tool. The
    /// default returns [Precondition::NeedsApply], meaning migrations always
    /// run unless overridden.
    fn precondition(&self, _conn: &Connection) -> Result<Precondition, Error> {
        Ok(Precondition::NeedsApply)
    }
}

impl PartialEq for dyn Migration {
    fn eq(&self, other: &Self) -> bool {
        self.version() == other.version()
    }
}

impl std::fmt::Debug for dyn Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version())
            .field("name", &self.name())
            .finish()
    }
}

/// Calculate a checksum for a migration based on its version and name.
/// This is used to verify that migrations haven't been modified after being
/// applied.
pub(crate) fn calculate_checksum(migration: &dyn Migration) -> String {
    let mut hasher = Sha256::new();
    hasher.update(migration.version().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(migration.name().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    impl Migration for Plain {
        fn version(&self) -> u64 {
            7
        }
        fn up(&self, _conn: &Connection) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn default_name_and_flags() {
        let m = Plain;
        assert_eq!(m.name(), "migration 7");
        assert!(m.transactional());
        assert!(!m.reversible());
        assert_eq!(m.description(), None);
    }

    #[test]
    fn default_down_is_irreversible() {
        let m = Plain;
        let conn = Connection::open_in_memory().unwrap();
        let err = m.down(&conn).unwrap_err();
        assert_eq!(
            err,
            Error::Irreversible {
                version: 7,
                name: "migration 7".to_string()
            }
        );
    }

    #[test]
    fn checksum_depends_on_version_and_name() {
        struct Renamed;
        impl Migration for Renamed {
            fn version(&self) -> u64 {
                7
            }
            fn name(&self) -> String {
                "create_users".to_string()
            }
            fn up(&self, _conn: &Connection) -> Result<(), Error> {
                Ok(())
            }
        }
        let a = calculate_checksum(&Plain);
        let b = calculate_checksum(&Renamed);
        assert_ne!(a, b);
        // stable across calls
        assert_eq!(a, calculate_checksum(&Plain));
    }
}
