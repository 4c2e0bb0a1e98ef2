//! Incremental indexing of stored content bodies.
//!
//! A save copies the item's snapshot into the pre-update slot and drops the
//! snapshot. The next full render finds no snapshot, extracts the body's
//! assets, diffs them against the pre-update copy and writes only the
//! difference. Renders with a snapshot in place return before doing any work.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::{unix_now, BulkUpsertCounts, Database, Position, SnapshotEntry};
use crate::extract::ExtractorChain;
use crate::host::{ContentHost, ContentState};
use crate::resolver::Resolver;

/// What kind of render produced the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderContext {
    /// The item's own page, or a save of it.
    FullPage,
    Excerpt,
    /// JSON/API serialization.
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No usable content id, or a partial render.
    NotIndexable,
    /// The body is a "list all assets" view.
    AggregateView,
    /// A snapshot exists and no reindex was forced.
    AlreadyIndexed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub content_id: i64,
    pub snapshot: Vec<SnapshotEntry>,
    /// Assets new relative to the baseline.
    pub added: Vec<i64>,
    /// Assets in the baseline but no longer referenced.
    pub removed: Vec<i64>,
    pub content_rows: BulkUpsertCounts,
    pub thumbnail_rows: BulkUpsertCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Skipped { reason: SkipReason },
    Indexed(SyncReport),
}

impl SyncOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped { .. })
    }
}

/// Rows and snapshot entries removed by a deletion hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub associations: usize,
    pub snapshots: usize,
}

pub struct Synchronizer<'a, H: ContentHost + ?Sized> {
    db: &'a Database,
    host: &'a H,
    chain: ExtractorChain,
    origin: String,
    aggregate_marker: String,
}

impl<'a, H: ContentHost + ?Sized> Synchronizer<'a, H> {
    pub fn new(db: &'a Database, host: &'a H, config: &Config) -> Self {
        Self {
            db,
            host,
            chain: ExtractorChain::with_defaults(config.index.images_only),
            origin: config.site.origin.clone(),
            aggregate_marker: config.site.aggregate_marker.clone(),
        }
    }

    /// Replace the default extractor chain.
    pub fn with_chain(mut self, chain: ExtractorChain) -> Self {
        self.chain = chain;
        self
    }

    /// Bring the item's snapshot, inverse snapshots and `content`/`thumbnail`
    /// rows in line with `body`.
    ///
    /// `force` reindexes even when a snapshot already exists.
    pub fn update_indexes(
        &self,
        content_id: i64,
        body: &str,
        context: RenderContext,
        force: bool,
    ) -> Result<SyncOutcome> {
        if content_id <= 0 || context != RenderContext::FullPage {
            return Ok(skipped(SkipReason::NotIndexable));
        }
        if !self.aggregate_marker.is_empty() && body.contains(&self.aggregate_marker) {
            debug!(content_id, "Body is an aggregate view, not indexing");
            return Ok(skipped(SkipReason::AggregateView));
        }
        let current = self.db.get_content_snapshot(content_id)?;
        if current.is_some() && !force {
            return Ok(skipped(SkipReason::AlreadyIndexed));
        }

        let resolver = Resolver::new(self.host, &self.origin);
        let body_ids = self.chain.extract_asset_ids(body, &resolver)?;
        let representative = match self.host.representative_asset(content_id)? {
            Some(id) if id > 0 && self.host.asset_exists(id)? => Some(id),
            _ => None,
        };

        let mut snapshot = Vec::with_capacity(body_ids.len() + 1);
        if let Some(id) = representative {
            snapshot.push(SnapshotEntry::representative(id));
        }
        snapshot.extend(
            body_ids
                .iter()
                .copied()
                .filter(|id| Some(*id) != representative)
                .map(SnapshotEntry::new),
        );

        // A consumed pre-update copy is the baseline; a forced run over an
        // existing snapshot diffs against that snapshot instead.
        let baseline = match self.db.get_pre_update_snapshot(content_id)? {
            Some(entries) => entries,
            None => current.unwrap_or_default(),
        };
        let old_ids: BTreeSet<i64> = baseline.iter().map(|e| e.asset_id).collect();
        let new_ids: BTreeSet<i64> = snapshot.iter().map(|e| e.asset_id).collect();
        let added: Vec<i64> = new_ids.difference(&old_ids).copied().collect();
        let removed: Vec<i64> = old_ids.difference(&new_ids).copied().collect();

        let now = unix_now();

        // Thumbnail first, so a body asset promoted to representative is
        // re-tagged instead of deleted by the content pass.
        let thumbnail_ids: Vec<i64> = representative.into_iter().collect();
        let thumbnail_rows =
            self.db
                .bulk_upsert_for_content(content_id, &thumbnail_ids, Position::Thumbnail, now)?;
        let content_ids: Vec<i64> = snapshot
            .iter()
            .filter(|e| !e.is_representative)
            .map(|e| e.asset_id)
            .collect();
        let content_rows =
            self.db
                .bulk_upsert_for_content(content_id, &content_ids, Position::Content, now)?;

        for asset_id in &new_ids {
            self.db.add_to_asset_snapshot(*asset_id, content_id, now)?;
        }
        for asset_id in &removed {
            self.db.remove_from_asset_snapshot(*asset_id, content_id)?;
        }

        self.db.put_content_snapshot(content_id, &snapshot, now)?;
        self.db.delete_pre_update_snapshot(content_id)?;

        info!(
            content_id,
            assets = snapshot.len(),
            added = added.len(),
            removed = removed.len(),
            forced = force,
            "Indexed content item"
        );

        Ok(SyncOutcome::Indexed(SyncReport {
            content_id,
            snapshot,
            added,
            removed,
            content_rows,
            thumbnail_rows,
        }))
    }

    /// Pre-save hook: keep the current snapshot as the diff baseline and
    /// drop it so the next render reindexes.
    ///
    /// Returns whether a baseline was stored.
    pub fn on_content_about_to_save(&self, content_id: i64) -> Result<bool> {
        if content_id <= 0 {
            return Ok(false);
        }
        let copied = self.db.copy_snapshot_to_pre_update(content_id, unix_now())?;
        self.db.delete_content_snapshot(content_id)?;
        debug!(content_id, copied, "Stored pre-update snapshot");
        Ok(copied)
    }

    /// Post-save hook: reindex from the host's stored body.
    pub fn on_content_changed(&self, content_id: i64) -> Result<SyncOutcome> {
        let Some(item) = self.host.content_item(content_id)? else {
            return Ok(skipped(SkipReason::NotIndexable));
        };
        if item.state == ContentState::Deleted {
            self.on_content_deleted(content_id)?;
            return Ok(skipped(SkipReason::NotIndexable));
        }
        self.update_indexes(content_id, &item.body, RenderContext::FullPage, false)
    }

    pub fn on_content_deleted(&self, content_id: i64) -> Result<DeletionReport> {
        let associations = self.db.delete_associations_for_content(content_id)?;
        let mut snapshots = self.db.remove_content_from_asset_snapshots(content_id)?;
        if self.db.delete_content_snapshot(content_id)? {
            snapshots += 1;
        }
        if self.db.delete_pre_update_snapshot(content_id)? {
            snapshots += 1;
        }
        self.db.delete_scan_record(content_id)?;
        info!(content_id, associations, snapshots, "Dropped deleted content item from index");
        Ok(DeletionReport {
            associations,
            snapshots,
        })
    }

    pub fn on_asset_deleted(&self, asset_id: i64) -> Result<DeletionReport> {
        let associations = self.db.delete_associations_for_asset(asset_id)?;
        let mut snapshots = self.db.delete_asset_snapshot(asset_id)?;
        snapshots += self
            .db
            .remove_asset_from_content_snapshots(asset_id, unix_now())?
            .len();
        self.db.delete_deep_search_bundle(asset_id)?;
        info!(asset_id, associations, snapshots, "Dropped deleted asset from index");
        Ok(DeletionReport {
            associations,
            snapshots,
        })
    }
}

fn skipped(reason: SkipReason) -> SyncOutcome {
    SyncOutcome::Skipped { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::host::{Asset, ContentItem};

    fn config() -> Config {
        let mut config = Config::default();
        config.site.origin = "https://example.org".to_string();
        config
    }

    fn put_asset(db: &Database, id: i64) {
        db.put_asset(&Asset {
            id,
            url: format!("https://example.org/uploads/a{}.jpg", id),
            mime_type: "image/jpeg".to_string(),
            title: None,
        })
        .unwrap();
    }

    fn put_item(db: &Database, id: i64, body: &str, representative: Option<i64>) {
        db.put_content_item(&ContentItem {
            id,
            title: format!("Item {}", id),
            body: body.to_string(),
            url: Some(format!("https://example.org/item-{}/", id)),
            state: ContentState::Published,
            representative_asset_id: representative,
        })
        .unwrap();
    }

    fn seeded() -> Database {
        let db = test_db();
        for id in [5, 6, 7] {
            put_asset(&db, id);
        }
        db
    }

    fn asset_ids(entries: &[SnapshotEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.asset_id).collect()
    }

    #[test]
    fn test_body_change_moves_inverse_snapshot() {
        let db = seeded();
        let config = config();
        let sync = Synchronizer::new(&db, &db, &config);

        let outcome = sync
            .update_indexes(1, r#"<img class="wp-image-5">"#, RenderContext::FullPage, false)
            .unwrap();
        assert!(!outcome.is_skipped());
        assert_eq!(db.get_content_snapshot(1).unwrap(), Some(vec![SnapshotEntry::new(5)]));
        assert_eq!(db.get_asset_snapshot(5).unwrap(), vec![1]);

        sync.on_content_about_to_save(1).unwrap();
        let outcome = sync
            .update_indexes(1, r#"<img src="/uploads/a7.jpg">"#, RenderContext::FullPage, false)
            .unwrap();
        let SyncOutcome::Indexed(report) = outcome else {
            panic!("expected reindex after save");
        };
        assert_eq!(report.added, vec![7]);
        assert_eq!(report.removed, vec![5]);
        assert_eq!(db.get_content_snapshot(1).unwrap(), Some(vec![SnapshotEntry::new(7)]));
        assert!(db.get_asset_snapshot(5).unwrap().is_empty());
        assert_eq!(db.get_asset_snapshot(7).unwrap(), vec![1]);
        assert_eq!(db.get_pre_update_snapshot(1).unwrap(), None);

        let rows = db.get_associations_for_content(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asset_id, 7);
        assert_eq!(rows[0].position, Position::Content);
    }

    #[test]
    fn test_second_render_is_a_noop() {
        let db = seeded();
        let config = config();
        let sync = Synchronizer::new(&db, &db, &config);
        let body = r#"<img class="wp-image-5"><img class="wp-image-6">"#;

        sync.update_indexes(1, body, RenderContext::FullPage, false).unwrap();
        let rows_before = db.get_associations_for_content(1).unwrap();
        let snapshot_before = db.get_content_snapshot(1).unwrap();

        let outcome = sync.update_indexes(1, body, RenderContext::FullPage, false).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::AlreadyIndexed
            }
        );
        assert_eq!(db.get_associations_for_content(1).unwrap(), rows_before);
        assert_eq!(db.get_content_snapshot(1).unwrap(), snapshot_before);
    }

    #[test]
    fn test_forced_reindex_diffs_against_current_snapshot() {
        let db = seeded();
        let config = config();
        let sync = Synchronizer::new(&db, &db, &config);

        sync.update_indexes(1, r#"<img class="wp-image-5">"#, RenderContext::FullPage, false)
            .unwrap();
        let outcome = sync
            .update_indexes(1, r#"<img class="wp-image-6">"#, RenderContext::FullPage, true)
            .unwrap();
        let SyncOutcome::Indexed(report) = outcome else {
            panic!("forced run must index");
        };
        assert_eq!(report.added, vec![6]);
        assert_eq!(report.removed, vec![5]);
        assert_eq!(report.content_rows.deleted, 1);
        assert!(db.get_asset_snapshot(5).unwrap().is_empty());
    }

    #[test]
    fn test_skip_conditions() {
        let db = seeded();
        let config = config();
        let sync = Synchronizer::new(&db, &db, &config);
        let body = r#"<img class="wp-image-5">"#;

        let not_indexable = SyncOutcome::Skipped {
            reason: SkipReason::NotIndexable,
        };
        assert_eq!(
            sync.update_indexes(0, body, RenderContext::FullPage, true).unwrap(),
            not_indexable
        );
        assert_eq!(
            sync.update_indexes(1, body, RenderContext::Excerpt, true).unwrap(),
            not_indexable
        );
        assert_eq!(
            sync.update_indexes(1, body, RenderContext::Api, true).unwrap(),
            not_indexable
        );

        let aggregate = format!("{}{}", config.site.aggregate_marker, body);
        assert_eq!(
            sync.update_indexes(1, &aggregate, RenderContext::FullPage, true).unwrap(),
            SyncOutcome::Skipped {
                reason: SkipReason::AggregateView
            }
        );
        assert_eq!(db.get_content_snapshot(1).unwrap(), None);
        assert_eq!(db.count_associations().unwrap(), 0);
    }

    #[test]
    fn test_representative_wins_over_body_appearance() {
        let db = seeded();
        let config = config();
        let sync = Synchronizer::new(&db, &db, &config);
        put_item(&db, 2, r#"<img class="wp-image-5"><img class="wp-image-6">"#, Some(6));

        sync.on_content_changed(2).unwrap();
        let snapshot = db.get_content_snapshot(2).unwrap().unwrap();
        assert_eq!(
            snapshot,
            vec![SnapshotEntry::representative(6), SnapshotEntry::new(5)]
        );

        let rows = db.get_associations_for_content(2).unwrap();
        let thumb = rows.iter().find(|r| r.asset_id == 6).unwrap();
        assert_eq!(thumb.position, Position::Thumbnail);
        let content = rows.iter().find(|r| r.asset_id == 5).unwrap();
        assert_eq!(content.position, Position::Content);
    }

    #[test]
    fn test_unresolvable_references_are_omitted() {
        let db = seeded();
        let config = config();
        let sync = Synchronizer::new(&db, &db, &config);

        let outcome = sync
            .update_indexes(
                3,
                r#"<img src="https://elsewhere.net/x.jpg"><img class="wp-image-5">"#,
                RenderContext::FullPage,
                false,
            )
            .unwrap();
        let SyncOutcome::Indexed(report) = outcome else {
            panic!("expected index");
        };
        assert_eq!(asset_ids(&report.snapshot), vec![5]);
    }

    #[test]
    fn test_save_before_first_index_stores_no_baseline() {
        let db = seeded();
        let config = config();
        let sync = Synchronizer::new(&db, &db, &config);

        assert!(!sync.on_content_about_to_save(4).unwrap());
        let outcome = sync
            .update_indexes(4, r#"<img class="wp-image-7">"#, RenderContext::FullPage, false)
            .unwrap();
        let SyncOutcome::Indexed(report) = outcome else {
            panic!("expected index");
        };
        assert_eq!(report.added, vec![7]);
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_deletion_hooks_clean_everything() {
        let db = seeded();
        let config = config();
        let sync = Synchronizer::new(&db, &db, &config);

        sync.update_indexes(1, r#"<img class="wp-image-5"><img class="wp-image-6">"#, RenderContext::FullPage, false)
            .unwrap();
        sync.update_indexes(2, r#"<img class="wp-image-5">"#, RenderContext::FullPage, false)
            .unwrap();

        let report = sync.on_asset_deleted(5).unwrap();
        assert_eq!(report.associations, 2);
        assert!(db.get_asset_snapshot(5).unwrap().is_empty());
        assert_eq!(
            db.get_content_snapshot(1).unwrap(),
            Some(vec![SnapshotEntry::new(6)])
        );

        let report = sync.on_content_deleted(1).unwrap();
        assert_eq!(report.associations, 1);
        assert_eq!(db.get_content_snapshot(1).unwrap(), None);
        assert!(db.get_asset_snapshot(6).unwrap().is_empty());
        assert!(db.get_associations_for_content(1).unwrap().is_empty());
    }
}
