//! Denormalized snapshots kept next to the association index.
//!
//! - content snapshot: assets the last successful pass over an item's stored body found
//! - pre-update snapshot: copy of the content snapshot taken right before a save,
//!   used as the diff baseline and deleted once consumed
//! - asset snapshot: the inverse list of content item ids per asset

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::Database;

/// One asset found in a content item's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub asset_id: i64,
    /// The item's designated cover asset.
    #[serde(default)]
    pub is_representative: bool,
}

impl SnapshotEntry {
    pub fn new(asset_id: i64) -> Self {
        Self {
            asset_id,
            is_representative: false,
        }
    }

    pub fn representative(asset_id: i64) -> Self {
        Self {
            asset_id,
            is_representative: true,
        }
    }
}

fn decode_entries(json: &str) -> Result<Vec<SnapshotEntry>> {
    serde_json::from_str(json).context("Corrupt snapshot entries")
}

impl Database {
    pub fn get_content_snapshot(&self, content_id: i64) -> Result<Option<Vec<SnapshotEntry>>> {
        self.read_entries(
            "SELECT entries FROM content_snapshots WHERE content_id = ?",
            content_id,
        )
    }

    pub fn put_content_snapshot(
        &self,
        content_id: i64,
        entries: &[SnapshotEntry],
        when: i64,
    ) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        self.conn.execute(
            r#"
            INSERT INTO content_snapshots (content_id, entries, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (content_id) DO UPDATE SET
                entries = excluded.entries,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![content_id, json, when],
        )?;
        Ok(())
    }

    pub fn delete_content_snapshot(&self, content_id: i64) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM content_snapshots WHERE content_id = ?", [content_id])?;
        Ok(n > 0)
    }

    pub fn get_pre_update_snapshot(&self, content_id: i64) -> Result<Option<Vec<SnapshotEntry>>> {
        self.read_entries(
            "SELECT entries FROM content_snapshots_pre_update WHERE content_id = ?",
            content_id,
        )
    }

    /// Copy the current content snapshot into the pre-update slot.
    /// Returns false when there was nothing to copy.
    pub fn copy_snapshot_to_pre_update(&self, content_id: i64, when: i64) -> Result<bool> {
        let n = self.conn.execute(
            r#"
            INSERT INTO content_snapshots_pre_update (content_id, entries, saved_at)
            SELECT content_id, entries, ? FROM content_snapshots WHERE content_id = ?
            ON CONFLICT (content_id) DO UPDATE SET
                entries = excluded.entries,
                saved_at = excluded.saved_at
            "#,
            rusqlite::params![when, content_id],
        )?;
        Ok(n > 0)
    }

    pub fn delete_pre_update_snapshot(&self, content_id: i64) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM content_snapshots_pre_update WHERE content_id = ?",
            [content_id],
        )?;
        Ok(n > 0)
    }

    fn read_entries(&self, sql: &str, content_id: i64) -> Result<Option<Vec<SnapshotEntry>>> {
        let json = match self
            .conn
            .query_row(sql, [content_id], |row| row.get::<_, String>(0))
        {
            Ok(json) => json,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(decode_entries(&json)?))
    }

    /// Content item ids recorded for an asset, ascending.
    pub fn get_asset_snapshot(&self, asset_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT content_id FROM asset_snapshots WHERE asset_id = ? ORDER BY content_id",
        )?;
        let ids = stmt
            .query_map([asset_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Append `content_id` to the asset's list; false if it was already there.
    pub fn add_to_asset_snapshot(&self, asset_id: i64, content_id: i64, when: i64) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO asset_snapshots (asset_id, content_id, added_at) VALUES (?, ?, ?)",
            rusqlite::params![asset_id, content_id, when],
        )?;
        Ok(n > 0)
    }

    pub fn remove_from_asset_snapshot(&self, asset_id: i64, content_id: i64) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM asset_snapshots WHERE asset_id = ? AND content_id = ?",
            rusqlite::params![asset_id, content_id],
        )?;
        Ok(n > 0)
    }

    pub fn delete_asset_snapshot(&self, asset_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM asset_snapshots WHERE asset_id = ?", [asset_id])?)
    }

    /// Drop `content_id` from every asset's list.
    pub fn remove_content_from_asset_snapshots(&self, content_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM asset_snapshots WHERE content_id = ?", [content_id])?)
    }

    /// Drop `asset_id` from every content snapshot that lists it.
    /// Returns the ids of the rewritten items.
    pub fn remove_asset_from_content_snapshots(&self, asset_id: i64, when: i64) -> Result<Vec<i64>> {
        let candidates: Vec<(i64, String)> = {
            let mut stmt = self.conn.prepare(
                "SELECT content_id, entries FROM content_snapshots WHERE entries LIKE ?",
            )?;
            let rows = stmt
                .query_map([format!("%\"asset_id\":{}%", asset_id)], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut rewritten = Vec::new();
        for (content_id, json) in candidates {
            let entries = decode_entries(&json)?;
            let kept: Vec<SnapshotEntry> = entries
                .iter()
                .copied()
                .filter(|e| e.asset_id != asset_id)
                .collect();
            if kept.len() != entries.len() {
                self.put_content_snapshot(content_id, &kept, when)?;
                rewritten.push(content_id);
            }
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_content_snapshot_roundtrip_and_absence() {
        let db = test_db();
        assert_eq!(db.get_content_snapshot(1).unwrap(), None);

        let entries = vec![SnapshotEntry::new(5), SnapshotEntry::representative(6)];
        db.put_content_snapshot(1, &entries, 100).unwrap();
        assert_eq!(db.get_content_snapshot(1).unwrap(), Some(entries));

        // An indexed item with no assets is distinct from an unindexed one.
        db.put_content_snapshot(2, &[], 100).unwrap();
        assert_eq!(db.get_content_snapshot(2).unwrap(), Some(vec![]));
    }

    #[test]
    fn test_pre_update_copy_and_consume() {
        let db = test_db();
        assert!(!db.copy_snapshot_to_pre_update(1, 10).unwrap());

        db.put_content_snapshot(1, &[SnapshotEntry::new(5)], 10).unwrap();
        assert!(db.copy_snapshot_to_pre_update(1, 20).unwrap());
        assert_eq!(
            db.get_pre_update_snapshot(1).unwrap(),
            Some(vec![SnapshotEntry::new(5)])
        );

        assert!(db.delete_pre_update_snapshot(1).unwrap());
        assert_eq!(db.get_pre_update_snapshot(1).unwrap(), None);
    }

    #[test]
    fn test_asset_snapshot_has_no_duplicates() {
        let db = test_db();
        assert!(db.add_to_asset_snapshot(5, 1, 10).unwrap());
        assert!(!db.add_to_asset_snapshot(5, 1, 11).unwrap());
        assert!(db.add_to_asset_snapshot(5, 2, 12).unwrap());
        assert_eq!(db.get_asset_snapshot(5).unwrap(), vec![1, 2]);

        assert!(db.remove_from_asset_snapshot(5, 1).unwrap());
        assert!(!db.remove_from_asset_snapshot(5, 1).unwrap());
        assert_eq!(db.get_asset_snapshot(5).unwrap(), vec![2]);
    }

    #[test]
    fn test_remove_asset_from_content_snapshots_is_exact() {
        let db = test_db();
        db.put_content_snapshot(1, &[SnapshotEntry::new(5), SnapshotEntry::new(55)], 1)
            .unwrap();
        db.put_content_snapshot(2, &[SnapshotEntry::new(55)], 1).unwrap();

        let rewritten = db.remove_asset_from_content_snapshots(5, 2).unwrap();
        assert_eq!(rewritten, vec![1]);
        assert_eq!(
            db.get_content_snapshot(1).unwrap(),
            Some(vec![SnapshotEntry::new(55)])
        );
        assert_eq!(
            db.get_content_snapshot(2).unwrap(),
            Some(vec![SnapshotEntry::new(55)])
        );
    }
}
