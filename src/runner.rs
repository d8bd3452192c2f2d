//! The runner: computes the pending set, applies it in order through the
//! executor, records ledger entries after each success, and halts on the
//! first failure. Also hosts the reversal controller (`rollback_to` /
//! `rollback_steps`) and the status/history queries.

use crate::core::{calculate_checksum, Direction, Migration, DEFAULT_LEDGER_TABLE_NAME};
use crate::error::Error;
use crate::executor::{self, Execution};
use crate::ledger::Ledger;
use crate::lock::RunLock;
use crate::registry::Registry;
use crate::report::{LedgerEntry, PendingMigration, RunOutcome, RunReport, StatusReport};
use chrono::Utc;
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cancellation signal, honored only at migration-body boundaries.
///
/// Cancelling mid-run never interrupts an in-flight body (which could leave
/// inconsistent state for non-transactional bodies); the runner checks the
/// token before starting each pending migration and marks the remainder
/// skipped.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The entrypoint for running a sequence of [Migration]s.
///
/// Construct this struct with the list of all migrations to be considered;
/// versions must be unique and greater than zero. Execution is strictly
/// sequential - later migrations may read or assume state left by earlier
/// ones, so no parallelism is ever attempted.
pub struct Runner {
    registry: Registry,
    ledger_table_name: String,
    busy_timeout: Duration,
    run_timeout: Option<Duration>,
    on_migration_start: Option<Box<dyn Fn(u64, &str) + Send + Sync>>,
    on_migration_complete: Option<Box<dyn Fn(u64, &str, Duration) + Send + Sync>>,
    on_migration_skipped: Option<Box<dyn Fn(u64, &str) + Send + Sync>>,
    on_migration_error: Option<Box<dyn Fn(u64, &str, &Error) + Send + Sync>>,
}

// Manual Debug impl since closures don't implement Debug
impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("registry", &self.registry)
            .field("ledger_table_name", &self.ledger_table_name)
            .field("busy_timeout", &self.busy_timeout)
            .field("run_timeout", &self.run_timeout)
            .field("on_migration_start", &self.on_migration_start.is_some())
            .field(
                "on_migration_complete",
                &self.on_migration_complete.is_some(),
            )
            .field("on_migration_skipped", &self.on_migration_skipped.is_some())
            .field("on_migration_error", &self.on_migration_error.is_some())
            .finish()
    }
}

impl Runner {
    /// Create a new Runner, validating migration invariants.
    /// Returns an error if migrations are invalid.
    pub fn try_new(migrations: Vec<Box<dyn Migration>>) -> Result<Self, Error> {
        Ok(Self::from_registry(Registry::try_new(migrations)?))
    }

    /// Create a new Runner, panicking if migration metadata is invalid.
    /// For a non-panicking version, use [Runner::try_new].
    pub fn new(migrations: Vec<Box<dyn Migration>>) -> Self {
        match Self::try_new(migrations) {
            Ok(runner) => runner,
            Err(err) => panic!("{}", err),
        }
    }

    /// Create a Runner from an already-validated [Registry].
    pub fn from_registry(registry: Registry) -> Self {
        Self {
            registry,
            ledger_table_name: DEFAULT_LEDGER_TABLE_NAME.to_string(),
            busy_timeout: Duration::from_secs(30),
            run_timeout: None,
            on_migration_start: None,
            on_migration_complete: None,
            on_migration_skipped: None,
            on_migration_error: None,
        }
    }

    /// Set a custom name for the ledger tracking table.
    /// Defaults to "_stratum_ledger_".
    pub fn with_ledger_table_name(mut self, name: impl Into<String>) -> Self {
        self.ledger_table_name = name.into();
        self
    }

    /// Set the busy timeout for SQLite database operations.
    /// This controls how long concurrent connections wait for locks instead
    /// of failing immediately. Defaults to 30 seconds.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set a deadline for a whole run invocation. No default.
    ///
    /// The deadline is checked at migration-body boundaries: an in-flight
    /// body is never interrupted (its natural duration may be long, e.g. an
    /// index build on a large table). When the deadline has elapsed, the next
    /// pending migration fails with [Error::Timeout], the run halts, and no
    /// ledger entry is written for it.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Set a callback to be invoked when a migration starts.
    /// The callback receives the migration version and name.
    pub fn on_migration_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, &str) + Send + Sync + 'static,
    {
        self.on_migration_start = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a migration completes successfully.
    /// The callback receives the migration version, name, and duration.
    pub fn on_migration_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, &str, Duration) + Send + Sync + 'static,
    {
        self.on_migration_complete = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a migration is stamped because its
    /// precondition reported the changes already present.
    /// The callback receives the migration version and name.
    pub fn on_migration_skipped<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, &str) + Send + Sync + 'static,
    {
        self.on_migration_skipped = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a migration fails.
    /// The callback receives the migration version, name, and error.
    pub fn on_migration_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, &str, &Error) + Send + Sync + 'static,
    {
        self.on_migration_error = Some(Box::new(callback));
        self
    }

    /// The descriptor catalogue this runner applies.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn ledger(&self) -> Ledger {
        Ledger::new(self.ledger_table_name.clone())
    }

    fn lock(&self) -> RunLock {
        RunLock::for_ledger(&self.ledger_table_name)
    }

    /// Clear a stale run lock left behind by a crashed process.
    ///
    /// Only call this after confirming no other run is actually in progress.
    pub fn force_unlock(&self, conn: &mut Connection) -> Result<(), Error> {
        self.lock().release(conn)
    }

    /// The highest applied version, or 0 if nothing has been applied.
    pub fn latest_version(&self, conn: &mut Connection) -> Result<u64, Error> {
        self.ledger().latest_version(conn)
    }

    /// The history of all applied migrations, ordered by version.
    /// Empty if no migrations have been applied.
    pub fn history(&self, conn: &mut Connection) -> Result<Vec<LedgerEntry>, Error> {
        self.ledger().history(conn)
    }

    /// Diff the registry against the ledger without executing anything.
    pub fn status(&self, conn: &mut Connection) -> Result<StatusReport, Error> {
        let ledger = self.ledger();
        let applied = ledger.history(conn)?;
        let applied_versions = ledger.applied_versions(conn)?;
        let pending = self
            .registry
            .ordered()
            .iter()
            .filter(|m| !applied_versions.contains(&m.version()))
            .map(|m| PendingMigration {
                version: m.version(),
                name: m.name(),
                transactional: m.transactional(),
                reversible: m.reversible(),
            })
            .collect();
        Ok(StatusReport { applied, pending })
    }

    /// Apply all previously-unapplied migrations, in ascending version order.
    ///
    /// The pending set is the registry minus the ledger's applied versions,
    /// recomputed fresh from the database on every invocation - a halted run
    /// is resumed simply by calling this again after fixing the root cause.
    /// The run halts on the first failure; later migrations are reported as
    /// skipped, never attempted.
    pub fn run_pending(&self, conn: &mut Connection) -> Result<RunReport, Error> {
        self.run_pending_internal(conn, None, &CancelToken::new())
    }

    /// Like [Runner::run_pending], but checks the supplied token before each
    /// migration and stops cleanly when cancelled.
    pub fn run_pending_with(
        &self,
        conn: &mut Connection,
        cancel: &CancelToken,
    ) -> Result<RunReport, Error> {
        self.run_pending_internal(conn, None, cancel)
    }

    /// Apply pending migrations up to and including the target version.
    ///
    /// If the database is already at or beyond the target, nothing runs.
    pub fn run_to(&self, conn: &mut Connection, target_version: u64) -> Result<RunReport, Error> {
        if target_version > 0 && !self.registry.contains(target_version) {
            return Err(Error::Generic(format!(
                "target version {} does not exist in migration list",
                target_version
            )));
        }
        self.run_pending_internal(conn, Some(target_version), &CancelToken::new())
    }

    fn run_pending_internal(
        &self,
        conn: &mut Connection,
        target_version: Option<u64>,
        cancel: &CancelToken,
    ) -> Result<RunReport, Error> {
        conn.busy_timeout(self.busy_timeout)?;

        let ledger = self.ledger();
        let ledger_created = ledger.initialize(conn)?;

        let lock = self.lock();
        lock.acquire(conn)?;
        let outcome = self.run_pending_locked(conn, &ledger, target_version, cancel, ledger_created);
        let released = lock.release(conn);
        match outcome {
            Ok(report) => {
                released?;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    fn run_pending_locked(
        &self,
        conn: &mut Connection,
        ledger: &Ledger,
        target_version: Option<u64>,
        cancel: &CancelToken,
        ledger_created: bool,
    ) -> Result<RunReport, Error> {
        self.validate_ledger(conn, ledger)?;

        let applied = ledger.applied_versions(conn)?;
        let pending: Vec<&dyn Migration> = self
            .registry
            .ordered()
            .iter()
            .map(|m| m.as_ref())
            .filter(|m| !applied.contains(&m.version()))
            .filter(|m| target_version.map_or(true, |t| m.version() <= t))
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            applied_count = applied.len(),
            target_version = ?target_version,
            pending = ?pending.iter().map(|m| (m.version(), m.name())).collect::<Vec<_>>(),
            "Computed pending set"
        );

        // All migrations in this batch get the same applied_at timestamp
        let batch_applied_at = Utc::now().to_rfc3339();
        let run_start = Instant::now();
        let mut outcomes: Vec<RunOutcome> = Vec::new();
        let mut halted = false;

        for migration in pending {
            let version = migration.version();
            let name = migration.name();

            if halted || cancel.is_cancelled() {
                outcomes.push(RunOutcome::skipped(version, name));
                continue;
            }

            if let Some(limit) = self.run_timeout {
                let elapsed = run_start.elapsed();
                if elapsed >= limit {
                    let error = Error::Timeout { elapsed, limit };
                    #[cfg(feature = "tracing")]
                    tracing::error!(version = version, error = %error, "Run deadline elapsed");
                    if let Some(ref callback) = self.on_migration_error {
                        callback(version, &name, &error);
                    }
                    outcomes.push(RunOutcome::failed(version, name, error));
                    halted = true;
                    continue;
                }
            }

            #[cfg(feature = "tracing")]
            let _span =
                tracing::info_span!("migration_up", version = version, name = %name).entered();

            #[cfg(feature = "tracing")]
            tracing::info!("Starting migration");

            if let Some(ref callback) = self.on_migration_start {
                callback(version, &name);
            }

            match executor::execute(conn, migration, Direction::Up) {
                Ok(Execution::Ran(duration)) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        duration_ms = duration.as_millis(),
                        "Migration completed successfully"
                    );

                    let checksum = calculate_checksum(migration);
                    ledger.record(conn, version, &name, &batch_applied_at, &checksum)?;

                    if let Some(ref callback) = self.on_migration_complete {
                        callback(version, &name, duration);
                    }
                    outcomes.push(RunOutcome::applied(version, name, Some(duration)));
                }
                Ok(Execution::Stamped) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!("Precondition already satisfied, stamping without running up()");

                    let checksum = calculate_checksum(migration);
                    ledger.record(conn, version, &name, &batch_applied_at, &checksum)?;

                    if let Some(ref callback) = self.on_migration_skipped {
                        callback(version, &name);
                    }
                    outcomes.push(RunOutcome::applied(version, name, None));
                }
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %error, "Migration failed");

                    if let Some(ref callback) = self.on_migration_error {
                        callback(version, &name, &error);
                    }
                    outcomes.push(RunOutcome::failed(version, name, error));
                    halted = true;
                }
            }
        }

        Ok(RunReport {
            ledger_created,
            outcomes,
        })
    }

    /// Reverse applied migrations down to the specified target version, in
    /// descending version order. Pass `target_version = 0` to reverse all.
    ///
    /// A migration that declares no down body fails fast with
    /// [Error::Irreversible] before anything is mutated for that step, and
    /// the run halts there; the ledger entry is erased only after the down
    /// body succeeds.
    pub fn rollback_to(
        &self,
        conn: &mut Connection,
        target_version: u64,
    ) -> Result<RunReport, Error> {
        conn.busy_timeout(self.busy_timeout)?;

        let ledger = self.ledger();
        if !ledger.exists(conn)? {
            // No migrations have been applied yet
            return Ok(RunReport {
                ledger_created: false,
                outcomes: vec![],
            });
        }

        let lock = self.lock();
        lock.acquire(conn)?;
        let outcome = self.rollback_locked(conn, &ledger, target_version);
        let released = lock.release(conn);
        match outcome {
            Ok(report) => {
                released?;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    fn rollback_locked(
        &self,
        conn: &mut Connection,
        ledger: &Ledger,
        target_version: u64,
    ) -> Result<RunReport, Error> {
        self.validate_ledger(conn, ledger)?;

        let applied = ledger.applied_versions(conn)?;
        let current = applied.iter().next_back().copied().unwrap_or(0);
        if target_version > current {
            return Err(Error::Generic(format!(
                "cannot rollback to version {} when current version is {}; target must be <= current version",
                target_version, current
            )));
        }

        let to_reverse: Vec<u64> = applied
            .iter()
            .rev()
            .copied()
            .filter(|v| *v > target_version)
            .collect();

        let mut outcomes: Vec<RunOutcome> = Vec::new();
        let mut halted = false;

        for version in to_reverse {
            // validate_ledger guarantees every recorded version is registered
            let migration = self.registry.get(version).ok_or_else(|| {
                Error::Generic(format!(
                    "migration {} was applied but is no longer present in the migration list",
                    version
                ))
            })?;
            let name = migration.name();

            if halted {
                outcomes.push(RunOutcome::skipped(version, name));
                continue;
            }

            #[cfg(feature = "tracing")]
            let _span =
                tracing::info_span!("migration_down", version = version, name = %name).entered();

            #[cfg(feature = "tracing")]
            tracing::info!("Rolling back migration");

            if let Some(ref callback) = self.on_migration_start {
                callback(version, &name);
            }

            match executor::execute(conn, migration, Direction::Down) {
                Ok(Execution::Ran(duration)) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        duration_ms = duration.as_millis(),
                        "Migration rolled back successfully"
                    );

                    ledger.erase(conn, version)?;

                    if let Some(ref callback) = self.on_migration_complete {
                        callback(version, &name, duration);
                    }
                    outcomes.push(RunOutcome::applied(version, name, Some(duration)));
                }
                // down bodies have no precondition path; kept for exhaustiveness
                Ok(Execution::Stamped) => {
                    ledger.erase(conn, version)?;
                    outcomes.push(RunOutcome::applied(version, name, None));
                }
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %error, "Migration rollback failed");

                    if let Some(ref callback) = self.on_migration_error {
                        callback(version, &name, &error);
                    }
                    outcomes.push(RunOutcome::failed(version, name, error));
                    halted = true;
                }
            }
        }

        Ok(RunReport {
            ledger_created: false,
            outcomes,
        })
    }

    /// Reverse the most recent `steps` applied migrations.
    pub fn rollback_steps(&self, conn: &mut Connection, steps: usize) -> Result<RunReport, Error> {
        let applied_desc: Vec<u64> = self
            .ledger()
            .applied_versions(conn)?
            .into_iter()
            .rev()
            .collect();
        let target = applied_desc.get(steps).copied().unwrap_or(0);
        self.rollback_to(conn, target)
    }

    /// Verify that the ledger and the registry agree: every recorded version
    /// must still exist in the registry with an unchanged checksum.
    fn validate_ledger(&self, conn: &Connection, ledger: &Ledger) -> Result<(), Error> {
        for entry in ledger.history(conn)? {
            match self.registry.get(entry.version) {
                Some(migration) => {
                    let current_checksum = calculate_checksum(migration);
                    if current_checksum != entry.checksum {
                        return Err(Error::Generic(format!(
                            "migration {} checksum mismatch: expected '{}' but found '{}'. \
                            Migration name in ledger: '{}', current name: '{}'. \
                            This indicates the migration was modified after being applied.",
                            entry.version,
                            entry.checksum,
                            current_checksum,
                            entry.name,
                            migration.name()
                        )));
                    }
                }
                None => {
                    return Err(Error::Generic(format!(
                        "migration {} ('{}') was previously applied but is no longer present in \
                        the migration list. Applied migrations cannot be removed from the codebase.",
                        entry.version, entry.name
                    )));
                }
            }
        }
        Ok(())
    }
}
