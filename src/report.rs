use crate::error::Error;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// The terminal status of one migration within a run.
#[derive(Debug, PartialEq)]
pub enum RunStatus {
    /// The body executed (or was stamped) and the ledger was updated.
    /// For rollback runs this means the down body executed and the ledger
    /// entry was erased.
    Applied,
    /// The body errored; the run halted here. The ledger was not touched for
    /// this version.
    Failed(Error),
    /// Never attempted: an earlier migration failed, the run deadline
    /// elapsed, or the run was cancelled before this version's turn.
    Skipped,
}

/// The outcome of one migration within a run.
#[derive(Debug)]
pub struct RunOutcome {
    pub version: u64,
    pub name: String,
    pub status: RunStatus,
    /// Body execution time. `None` for skipped migrations and for
    /// precondition-stamped migrations whose body never ran.
    pub duration: Option<Duration>,
}

impl RunOutcome {
    pub(crate) fn applied(version: u64, name: String, duration: Option<Duration>) -> Self {
        Self {
            version,
            name,
            status: RunStatus::Applied,
            duration,
        }
    }

    pub(crate) fn failed(version: u64, name: String, error: Error) -> Self {
        Self {
            version,
            name,
            status: RunStatus::Failed(error),
            duration: None,
        }
    }

    pub(crate) fn skipped(version: u64, name: String) -> Self {
        Self {
            version,
            name,
            status: RunStatus::Skipped,
            duration: None,
        }
    }
}

/// A report of actions performed during a run (forward or rollback).
///
/// Every public engine operation returns a report rather than erroring for
/// expected business outcomes: "nothing pending" is a success with an empty
/// outcome list. A halted run's report names exactly which version failed,
/// the underlying error, and the versions applied before the halt.
#[derive(Debug)]
pub struct RunReport {
    /// Whether this run created the ledger table (it did not exist before).
    pub ledger_created: bool,
    /// Per-migration outcomes, in the order they were considered.
    pub outcomes: Vec<RunOutcome>,
}

impl RunReport {
    /// True iff every considered migration applied and no failures occurred.
    /// An empty report (nothing was pending) is a success.
    pub fn success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == RunStatus::Applied)
    }

    /// Versions that were applied (or reversed, for a rollback run), in
    /// execution order.
    pub fn applied_versions(&self) -> Vec<u64> {
        self.outcomes
            .iter()
            .filter(|o| o.status == RunStatus::Applied)
            .map(|o| o.version)
            .collect()
    }

    /// The outcome that halted the run, if any.
    pub fn failure(&self) -> Option<&RunOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.status, RunStatus::Failed(_)))
    }

    /// Versions that were never attempted because the run halted or was
    /// cancelled first.
    pub fn skipped_versions(&self) -> Vec<u64> {
        self.outcomes
            .iter()
            .filter(|o| o.status == RunStatus::Skipped)
            .map(|o| o.version)
            .collect()
    }
}

/// One persisted ledger row: a migration that has been successfully applied.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// The version number of the migration.
    pub version: u64,
    /// The name of the migration.
    pub name: String,
    /// The timestamp when the migration was applied.
    pub applied_at: DateTime<Utc>,
    /// The checksum of the migration at the time it was applied.
    pub checksum: String,
}

/// A migration known to the registry but absent from the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMigration {
    pub version: u64,
    pub name: String,
    pub transactional: bool,
    pub reversible: bool,
}

/// Answer to "is the database up to date": the applied ledger snapshot plus
/// the pending set, both in ascending version order.
#[derive(Debug)]
pub struct StatusReport {
    pub applied: Vec<LedgerEntry>,
    pub pending: Vec<PendingMigration>,
}

impl StatusReport {
    /// True iff no registered migration is missing from the ledger.
    pub fn up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}
