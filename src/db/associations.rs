//! Association store: which asset appears in which content item, and where.
//!
//! One row per `(content_id, asset_id)`. `content` and `thumbnail` rows come
//! from the stored body, `head` and `body` rows from fetched pages. Every write
//! is a single statement or a single immediate transaction so the synchronizer
//! and the crawler can write the same pair without losing updates.

use anyhow::Result;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

use super::Database;

/// Where in the rendering an asset was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Content,
    Thumbnail,
    Head,
    Body,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Content => "content",
            Position::Thumbnail => "thumbnail",
            Position::Head => "head",
            Position::Body => "body",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "content" => Some(Position::Content),
            "thumbnail" => Some(Position::Thumbnail),
            "head" => Some(Position::Head),
            "body" => Some(Position::Body),
            _ => None,
        }
    }

    /// Found in a fetched page rather than in the stored body.
    pub fn is_rendered(&self) -> bool {
        matches!(self, Position::Head | Position::Body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Association {
    pub id: i64,
    pub content_id: i64,
    pub asset_id: i64,
    pub position: Position,
    pub last_checked: i64,
}

/// Outcome of [`Database::bulk_upsert_for_content`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkUpsertCounts {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Rows for the position after the pass (`added + updated`).
    pub total: usize,
}

/// Scope of an "oldest entry" staleness lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexScope {
    Global,
    Content(i64),
}

// Rendered positions never downgrade a body-derived row; they only confirm it.
const UPSERT_SQL: &str = r#"
    INSERT INTO associations (content_id, asset_id, position, last_checked)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (content_id, asset_id) DO UPDATE SET
        last_checked = excluded.last_checked,
        position = CASE
            WHEN excluded.position IN ('head', 'body')
                 AND associations.position IN ('content', 'thumbnail')
            THEN associations.position
            ELSE excluded.position
        END
    RETURNING id
"#;

fn row_to_association(row: &Row) -> rusqlite::Result<Option<Association>> {
    let position: String = row.get(3)?;
    let Some(position) = Position::parse(&position) else {
        return Ok(None);
    };
    Ok(Some(Association {
        id: row.get(0)?,
        content_id: row.get(1)?,
        asset_id: row.get(2)?,
        position,
        last_checked: row.get(4)?,
    }))
}

impl Database {
    /// Insert or refresh the row for `(content_id, asset_id)`.
    ///
    /// Returns `None` without touching the store when either id is not positive.
    pub fn upsert_association(
        &self,
        content_id: i64,
        asset_id: i64,
        position: Position,
        when: i64,
    ) -> Result<Option<i64>> {
        if content_id <= 0 || asset_id <= 0 {
            debug!(content_id, asset_id, "Rejected association with non-positive id");
            return Ok(None);
        }
        let id = self.conn.query_row(
            UPSERT_SQL,
            rusqlite::params![content_id, asset_id, position.as_str(), when],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(Some(id))
    }

    /// Replace the `position` rows of one content item with `asset_ids`.
    ///
    /// Ids present in the list are added or refreshed, rows of that position
    /// missing from the list are deleted, rows of other positions are left alone.
    /// Non-positive ids are skipped and not counted.
    pub fn bulk_upsert_for_content(
        &self,
        content_id: i64,
        asset_ids: &[i64],
        position: Position,
        when: i64,
    ) -> Result<BulkUpsertCounts> {
        let mut counts = BulkUpsertCounts::default();
        if content_id <= 0 {
            warn!(content_id, "Refusing bulk upsert for non-positive content id");
            return Ok(counts);
        }

        let wanted: BTreeSet<i64> = asset_ids.iter().copied().filter(|id| *id > 0).collect();

        let tx = self.write_transaction()?;

        let existing: HashMap<i64, String> = {
            let mut stmt =
                tx.prepare("SELECT asset_id, position FROM associations WHERE content_id = ?")?;
            let rows = stmt
                .query_map([content_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        {
            let mut upsert = tx.prepare(UPSERT_SQL)?;
            for asset_id in &wanted {
                upsert.query_row(
                    rusqlite::params![content_id, asset_id, position.as_str(), when],
                    |_| Ok(()),
                )?;
                if existing.contains_key(asset_id) {
                    counts.updated += 1;
                } else {
                    counts.added += 1;
                }
            }

            let mut delete = tx.prepare(
                "DELETE FROM associations WHERE content_id = ? AND asset_id = ? AND position = ?",
            )?;
            for (asset_id, existing_position) in &existing {
                if existing_position == position.as_str() && !wanted.contains(asset_id) {
                    counts.deleted +=
                        delete.execute(rusqlite::params![content_id, asset_id, position.as_str()])?;
                }
            }
        }

        tx.commit()?;

        counts.total = counts.added + counts.updated;
        debug!(
            content_id,
            position = position.as_str(),
            added = counts.added,
            updated = counts.updated,
            deleted = counts.deleted,
            "Bulk upsert applied"
        );
        Ok(counts)
    }

    /// Rows for one content item, one per asset. Duplicates keep the latest write.
    pub fn get_associations_for_content(&self, content_id: i64) -> Result<Vec<Association>> {
        let rows = self.query_associations(
            "SELECT id, content_id, asset_id, position, last_checked FROM associations
             WHERE content_id = ? ORDER BY last_checked ASC, id ASC",
            content_id,
        )?;
        Ok(last_write_per_key(rows, |a| a.asset_id))
    }

    /// Rows for one asset, one per content item. Duplicates keep the latest write.
    pub fn get_associations_for_asset(&self, asset_id: i64) -> Result<Vec<Association>> {
        let rows = self.query_associations(
            "SELECT id, content_id, asset_id, position, last_checked FROM associations
             WHERE asset_id = ? ORDER BY last_checked ASC, id ASC",
            asset_id,
        )?;
        Ok(last_write_per_key(rows, |a| a.content_id))
    }

    fn query_associations(&self, sql: &str, key: i64) -> Result<Vec<Association>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([key], row_to_association)?
            .filter_map(|r| r.ok().flatten())
            .collect();
        Ok(rows)
    }

    /// Rows for `asset_id` at `position`, optionally only those confirmed at or after `since`.
    pub fn count_by_asset_and_position(
        &self,
        asset_id: i64,
        position: Position,
        since: i64,
    ) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM associations
             WHERE asset_id = ? AND position = ? AND last_checked >= ?",
            rusqlite::params![asset_id, position.as_str(), since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Whether the asset shows up in rendered pages of more than `threshold` items
    /// (a logo, a tracking pixel). Body-derived rows never count.
    pub fn is_probably_global(&self, asset_id: i64, threshold: u32) -> Result<bool> {
        let rendered = self.count_by_asset_and_position(asset_id, Position::Head, 0)?
            + self.count_by_asset_and_position(asset_id, Position::Body, 0)?;
        Ok(rendered > i64::from(threshold))
    }

    /// Evict rows last confirmed before `cutoff - safety_margin`.
    pub fn delete_not_updated_since(&self, cutoff: i64, safety_margin: i64) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM associations WHERE last_checked < ?",
            [cutoff - safety_margin],
        )?;
        self.oldest_entry_cache().invalidate();
        info!(cutoff, safety_margin, deleted, "Evicted stale associations");
        Ok(deleted)
    }

    /// Oldest `last_checked` in scope. The global value is cached until a
    /// maintenance operation invalidates it; per-item values are always fresh.
    pub fn oldest_entry_timestamp(&self, scope: IndexScope) -> Result<Option<i64>> {
        match scope {
            IndexScope::Global => self.oldest_entry_cache().get_or_compute(|| {
                let oldest = self.conn.query_row(
                    "SELECT MIN(last_checked) FROM associations",
                    [],
                    |row| row.get::<_, Option<i64>>(0),
                )?;
                Ok(oldest)
            }),
            IndexScope::Content(content_id) => {
                let oldest = self.conn.query_row(
                    "SELECT MIN(last_checked) FROM associations WHERE content_id = ?",
                    [content_id],
                    |row| row.get::<_, Option<i64>>(0),
                )?;
                Ok(oldest)
            }
        }
    }

    /// Remove rows whose content item or asset no longer exists in the host mirror.
    pub fn delete_orphaned(&self) -> Result<usize> {
        let deleted = self.conn.execute(
            r#"
            DELETE FROM associations
            WHERE content_id NOT IN (SELECT id FROM content_items WHERE state != 'deleted')
               OR asset_id NOT IN (SELECT id FROM assets)
            "#,
            [],
        )?;
        self.oldest_entry_cache().invalidate();
        info!(deleted, "Removed orphaned associations");
        Ok(deleted)
    }

    /// Remove rows with non-positive ids, left behind by partial writes.
    pub fn delete_invalid(&self) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM associations WHERE content_id <= 0 OR asset_id <= 0
                OR position NOT IN ('content', 'thumbnail', 'head', 'body')",
            [],
        )?;
        self.oldest_entry_cache().invalidate();
        info!(deleted, "Removed invalid associations");
        Ok(deleted)
    }

    pub fn delete_associations_for_content(&self, content_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM associations WHERE content_id = ?", [content_id])?)
    }

    pub fn delete_associations_for_asset(&self, asset_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM associations WHERE asset_id = ?", [asset_id])?)
    }

    /// Drop the whole index together with scan bookkeeping.
    pub fn clear_all(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            DELETE FROM associations;
            DELETE FROM content_scans;
            DELETE FROM deep_search_cache;
            "#,
        )?;
        self.oldest_entry_cache().invalidate();
        info!("Cleared association index");
        Ok(())
    }

    pub fn count_associations(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM associations", [], |row| row.get(0))?)
    }
}

fn last_write_per_key<F>(rows: Vec<Association>, key: F) -> Vec<Association>
where
    F: Fn(&Association) -> i64,
{
    let mut by_key = BTreeMap::new();
    for row in rows {
        by_key.insert(key(&row), row);
    }
    by_key.into_values().collect()
}
