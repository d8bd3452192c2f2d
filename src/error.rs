use std::time::Duration;

/// Error type for the stratum crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An underlying database error surfaced by a migration body or by the
    /// engine's own ledger/lock statements.
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Two descriptors (or two ledger writes) collided on the same version.
    #[error("duplicate migration version: {version}")]
    DuplicateVersion { version: u64 },
    /// A descriptor failed load-time validation (missing up body, version 0).
    #[error("malformed migration descriptor: {0}")]
    MalformedDescriptor(String),
    /// A rollback targeted a migration that declares no down body.
    #[error("migration {version} ('{name}') is irreversible: it declares no down body")]
    Irreversible { version: u64, name: String },
    /// A non-transactional body failed partway. The database may hold some of
    /// the body's effects; the engine cannot say which statements succeeded,
    /// so the version was not recorded and manual inspection is required.
    #[error("migration {version} ('{name}') failed without a wrapping transaction and may be partially applied: {source}")]
    PartialApplication {
        version: u64,
        name: String,
        source: Box<Error>,
    },
    /// The per-run deadline elapsed before the next migration could start.
    #[error("run timeout of {limit:?} exceeded after {elapsed:?}")]
    Timeout { elapsed: Duration, limit: Duration },
    /// Another run holds the lock against this database.
    #[error("another migration run is in progress (run lock is held)")]
    LockContention,
    #[error("{0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}

// Manual PartialEq implementation; elapsed time is excluded from Timeout
// comparisons since it is never reproducible.
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Sqlite(a), Self::Sqlite(b)) => a == b,
            (Self::DuplicateVersion { version: a }, Self::DuplicateVersion { version: b }) => {
                a == b
            }
            (Self::MalformedDescriptor(a), Self::MalformedDescriptor(b)) => a == b,
            (
                Self::Irreversible {
                    version: a,
                    name: an,
                },
                Self::Irreversible {
                    version: b,
                    name: bn,
                },
            ) => a == b && an == bn,
            (
                Self::PartialApplication {
                    version: a,
                    name: an,
                    source: asrc,
                },
                Self::PartialApplication {
                    version: b,
                    name: bn,
                    source: bsrc,
                },
            ) => a == b && an == bn && asrc == bsrc,
            (Self::Timeout { limit: a, .. }, Self::Timeout { limit: b, .. }) => a == b,
            (Self::LockContention, Self::LockContention) => true,
            (Self::Generic(a), Self::Generic(b)) => a == b,
            _ => false,
        }
    }
}
