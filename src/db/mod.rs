mod schema;
pub mod associations;
pub mod content;
pub mod deep_search;
pub mod scans;
pub mod schedule;
pub mod snapshots;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::cell::Cell;
use std::path::Path;

pub use associations::{Association, BulkUpsertCounts, IndexScope, Position};
pub use deep_search::MetaMatch;
pub use scans::{ScanRecord, ScanStatus, ScanTarget, TargetMode, UsageConfirmation};
pub use schedule::{ScheduleStatus, ScheduledTask, ScheduledTaskType, SCHEDULE_TIME_FORMAT};
pub use schema::{MIGRATIONS, SCHEMA};
pub use snapshots::SnapshotEntry;

/// Current time as unix seconds, the unit every index timestamp uses.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Lazily computed "oldest `last_checked` in the whole index".
///
/// Filled on first read and only dropped by [`OldestEntryCache::invalidate`],
/// which the maintenance operations call. Individual writes never touch it.
#[derive(Debug, Default)]
pub struct OldestEntryCache {
    value: Cell<Option<Option<i64>>>,
}

impl OldestEntryCache {
    pub fn get_or_compute<F>(&self, compute: F) -> Result<Option<i64>>
    where
        F: FnOnce() -> Result<Option<i64>>,
    {
        if let Some(cached) = self.value.get() {
            return Ok(cached);
        }
        let fresh = compute()?;
        self.value.set(Some(fresh));
        Ok(fresh)
    }

    pub fn invalidate(&self) {
        self.value.set(None);
    }

    pub fn is_populated(&self) -> bool {
        self.value.get().is_some()
    }
}

pub struct Database {
    pub(crate) conn: Connection,
    oldest_entry: OldestEntryCache,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        // CLI and daemon share the file; wait for the other writer instead of failing.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            oldest_entry: OldestEntryCache::default(),
        }
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }

    /// Write transaction that takes the database lock up front, so the
    /// read half of a read-then-write pass cannot interleave with the other writer.
    pub(crate) fn write_transaction(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    pub(crate) fn oldest_entry_cache(&self) -> &OldestEntryCache {
        &self.oldest_entry
    }
}

#[cfg(test)]
pub(crate) fn test_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.initialize().unwrap();
    db
}
