//! The run lock: prevents two processes from migrating the same database at
//! once (the classic double-deploy race).
//!
//! Implemented as a single-row lock table next to the ledger; acquisition is
//! an INSERT against a primary key, so exactly one contender wins. The runner
//! releases the lock on every exit path of a run. A process that dies while
//! holding the lock leaves the row behind;
//! [Runner::force_unlock](crate::Runner::force_unlock) clears it after manual
//! inspection.

use crate::error::Error;
use chrono::Utc;
use rusqlite::Connection;

pub(crate) struct RunLock {
    table_name: String,
}

impl RunLock {
    /// The lock table name is derived from the ledger table name so custom
    /// ledger names keep the pair together.
    pub fn for_ledger(ledger_table_name: &str) -> Self {
        Self {
            table_name: format!("{}lock_", ledger_table_name),
        }
    }

    /// Acquire the lock, failing with [Error::LockContention] if another run
    /// holds it.
    pub fn acquire(&self, conn: &Connection) -> Result<(), Error> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (id integer primary key not null, locked_at text not null)",
                self.table_name
            ),
            [],
        )?;
        let locked_at = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (id, locked_at) VALUES (1, ?1)",
                self.table_name
            ),
            [&locked_at],
        )?;
        if inserted == 0 {
            return Err(Error::LockContention);
        }
        Ok(())
    }

    /// Release the lock. Safe to call when not held, even before the lock
    /// table exists.
    pub fn release(&self, conn: &Connection) -> Result<(), Error> {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
        let exists = stmt.query([&self.table_name])?.next()?.is_some();
        if exists {
            conn.execute(&format!("DELETE FROM {} WHERE id = 1", self.table_name), [])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let conn = Connection::open_in_memory().unwrap();
        let lock = RunLock::for_ledger("_stratum_ledger_");
        lock.acquire(&conn).unwrap();
        lock.release(&conn).unwrap();
        // reacquirable after release
        lock.acquire(&conn).unwrap();
    }

    #[test]
    fn second_acquire_contends() {
        let conn = Connection::open_in_memory().unwrap();
        let lock = RunLock::for_ledger("_stratum_ledger_");
        lock.acquire(&conn).unwrap();
        let err = lock.acquire(&conn).unwrap_err();
        assert_eq!(err, Error::LockContention);
    }

    #[test]
    fn release_without_hold_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        let lock = RunLock::for_ledger("_stratum_ledger_");
        // before the lock table even exists
        lock.release(&conn).unwrap();
        lock.acquire(&conn).unwrap();
        lock.release(&conn).unwrap();
        lock.release(&conn).unwrap();
    }
}
