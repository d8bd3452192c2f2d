//! The version ledger: the persisted, append-only record of applied
//! migrations, and the only durable state this engine owns.
//!
//! External tooling (deploy scripts, health checks) depends on this table's
//! shape to answer "is the database up to date": `version` (unique key),
//! `name`, `applied_at` (RFC 3339 text), `checksum`.

use crate::error::Error;
use crate::report::LedgerEntry;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;

pub(crate) struct Ledger {
    table_name: String,
}

impl Ledger {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Whether the tracking table exists yet.
    pub fn exists(&self, conn: &Connection) -> Result<bool, Error> {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
        let exists = stmt.query([&self.table_name])?.next()?.is_some();
        Ok(exists)
    }

    /// Ensure the tracking table exists. Idempotent - effectively migration
    /// zero, safe to call on every run. Returns true if the table was created
    /// by this call.
    pub fn initialize(&self, conn: &Connection) -> Result<bool, Error> {
        let existed = self.exists(conn)?;
        if !existed {
            // IF NOT EXISTS handles concurrent creation attempts
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (version integer primary key not null, name text not null, applied_at text not null, checksum text not null)",
                    self.table_name
                ),
                [],
            )?;
        }
        Ok(!existed)
    }

    /// All versions currently recorded, as a consistent snapshot.
    pub fn applied_versions(&self, conn: &Connection) -> Result<BTreeSet<u64>, Error> {
        if !self.exists(conn)? {
            return Ok(BTreeSet::new());
        }
        let mut stmt = conn.prepare(&format!("SELECT version FROM {}", self.table_name))?;
        let versions = stmt
            .query_map([], |row| row.get::<_, u64>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(versions)
    }

    /// The highest recorded version, or 0 if nothing has been applied.
    pub fn latest_version(&self, conn: &Connection) -> Result<u64, Error> {
        if !self.exists(conn)? {
            return Ok(0);
        }
        let mut stmt = conn.prepare(&format!("SELECT MAX(version) FROM {}", self.table_name))?;
        let version: Option<u64> = stmt.query_row([], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }

    /// Append one entry. Defensive against double-recording: fails with
    /// [Error::DuplicateVersion] if the version is already present, which the
    /// runner's diffing should make unreachable.
    pub fn record(
        &self,
        conn: &Connection,
        version: u64,
        name: &str,
        applied_at: &str,
        checksum: &str,
    ) -> Result<(), Error> {
        let mut stmt = conn.prepare(&format!(
            "SELECT version FROM {} WHERE version = ?1",
            self.table_name
        ))?;
        if stmt.query([version])?.next()?.is_some() {
            return Err(Error::DuplicateVersion { version });
        }
        conn.execute(
            &format!(
                "INSERT INTO {} (version, name, applied_at, checksum) VALUES(?1, ?2, ?3, ?4)",
                self.table_name
            ),
            params![version, name, applied_at, checksum],
        )?;
        Ok(())
    }

    /// Remove one entry. A no-op if the version is absent.
    pub fn erase(&self, conn: &Connection, version: u64) -> Result<(), Error> {
        conn.execute(
            &format!("DELETE FROM {} WHERE version = ?1", self.table_name),
            params![version],
        )?;
        Ok(())
    }

    /// All entries, ordered by version. Empty if the tracking table does not
    /// exist yet.
    pub fn history(&self, conn: &Connection) -> Result<Vec<LedgerEntry>, Error> {
        if !self.exists(conn)? {
            return Ok(vec![]);
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT version, name, applied_at, checksum FROM {} ORDER BY version",
            self.table_name
        ))?;
        let entries = stmt
            .query_map([], |row| {
                let applied_at_str: String = row.get(2)?;
                let applied_at = chrono::DateTime::parse_from_rfc3339(&applied_at_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc);
                Ok(LedgerEntry {
                    version: row.get(0)?,
                    name: row.get(1)?,
                    applied_at,
                    checksum: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_and_conn() -> (Ledger, Connection) {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("_stratum_ledger_");
        (ledger, conn)
    }

    #[test]
    fn initialize_is_idempotent() {
        let (ledger, conn) = ledger_and_conn();
        assert!(!ledger.exists(&conn).unwrap());
        assert!(ledger.initialize(&conn).unwrap());
        assert!(ledger.exists(&conn).unwrap());
        // second call must not fail and must report "already present"
        assert!(!ledger.initialize(&conn).unwrap());
    }

    #[test]
    fn applied_versions_empty_without_table() {
        let (ledger, conn) = ledger_and_conn();
        assert!(ledger.applied_versions(&conn).unwrap().is_empty());
        assert_eq!(ledger.latest_version(&conn).unwrap(), 0);
    }

    #[test]
    fn record_then_read_back() {
        let (ledger, conn) = ledger_and_conn();
        ledger.initialize(&conn).unwrap();
        let now = Utc::now().to_rfc3339();
        ledger.record(&conn, 1, "first", &now, "abc").unwrap();
        ledger.record(&conn, 3, "third", &now, "def").unwrap();

        let versions = ledger.applied_versions(&conn).unwrap();
        assert_eq!(versions.into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(ledger.latest_version(&conn).unwrap(), 3);

        let history = ledger.history(&conn).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].name, "first");
        assert_eq!(history[0].checksum, "abc");
        assert_eq!(history[1].version, 3);
    }

    #[test]
    fn record_rejects_duplicate_version() {
        let (ledger, conn) = ledger_and_conn();
        ledger.initialize(&conn).unwrap();
        let now = Utc::now().to_rfc3339();
        ledger.record(&conn, 1, "first", &now, "abc").unwrap();
        let err = ledger.record(&conn, 1, "first again", &now, "abc").unwrap_err();
        assert_eq!(err, Error::DuplicateVersion { version: 1 });
    }

    #[test]
    fn erase_is_silent_on_absent_version() {
        let (ledger, conn) = ledger_and_conn();
        ledger.initialize(&conn).unwrap();
        ledger.erase(&conn, 42).unwrap();

        let now = Utc::now().to_rfc3339();
        ledger.record(&conn, 2, "second", &now, "xyz").unwrap();
        ledger.erase(&conn, 2).unwrap();
        assert!(ledger.applied_versions(&conn).unwrap().is_empty());
    }
}
