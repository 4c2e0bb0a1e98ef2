//! SQLite mirror of the content-management host.
//!
//! Content items, assets and the auxiliary key/value storage the deep search
//! looks through. [`Database`] implements [`ContentHost`] over these tables.

use anyhow::Result;
use regex::Regex;
use rusqlite::Row;
use std::sync::LazyLock;
use url::Url;

use super::Database;
use crate::host::{Asset, ContentHost, ContentItem, ContentState};

/// `photo-300x200.jpg` is a resized rendition of `photo.jpg`.
static SIZE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d+x\d+(\.[A-Za-z0-9]+)$").unwrap());

/// Query parameters that address a content item by id.
const ID_QUERY_KEYS: &[&str] = &["p", "page_id", "id"];

fn row_to_content_item(row: &Row) -> rusqlite::Result<ContentItem> {
    let state: String = row.get(4)?;
    Ok(ContentItem {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        url: row.get(3)?,
        state: ContentState::parse(&state).unwrap_or(ContentState::Draft),
        representative_asset_id: row.get(5)?,
    })
}

/// Forms a stored URL may take for the same resource: with and without the
/// trailing slash, over http and https. Query strings are kept, fragments dropped.
pub(crate) fn url_variants(raw: &str) -> Vec<String> {
    let Ok(mut parsed) = Url::parse(raw.trim()) else {
        return vec![raw.trim().to_string()];
    };
    parsed.set_fragment(None);

    let path = parsed.path().trim_end_matches('/').to_string();
    let mut variants = Vec::with_capacity(4);
    for scheme in ["http", "https"] {
        if parsed.scheme() != scheme && parsed.set_scheme(scheme).is_err() {
            continue;
        }
        for with_slash in [false, true] {
            let mut candidate = parsed.clone();
            if with_slash {
                candidate.set_path(&format!("{}/", path));
            } else {
                candidate.set_path(&path);
            }
            let s = candidate.to_string();
            if !variants.contains(&s) {
                variants.push(s);
            }
        }
    }
    variants
}

impl Database {
    pub fn put_content_item(&self, item: &ContentItem) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO content_items (id, title, body, url, state, representative_asset_id, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                body = excluded.body,
                url = excluded.url,
                state = excluded.state,
                representative_asset_id = excluded.representative_asset_id,
                updated_at = CURRENT_TIMESTAMP
            "#,
            rusqlite::params![
                item.id,
                item.title,
                item.body,
                item.url,
                item.state.as_str(),
                item.representative_asset_id,
            ],
        )?;
        Ok(())
    }

    pub fn set_content_state(&self, id: i64, state: ContentState) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE content_items SET state = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            rusqlite::params![state.as_str(), id],
        )?;
        Ok(n > 0)
    }

    pub fn get_content_item(&self, id: i64) -> Result<Option<ContentItem>> {
        let result = self.conn.query_row(
            "SELECT id, title, body, url, state, representative_asset_id
             FROM content_items WHERE id = ?",
            [id],
            row_to_content_item,
        );
        match result {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_content_items(&self, state: Option<ContentState>) -> Result<Vec<ContentItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, body, url, state, representative_asset_id
             FROM content_items
             WHERE ?1 IS NULL OR state = ?1
             ORDER BY id",
        )?;
        let items = stmt
            .query_map([state.map(|s| s.as_str())], row_to_content_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    pub fn put_asset(&self, asset: &Asset) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO assets (id, url, mime_type, title) VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                url = excluded.url,
                mime_type = excluded.mime_type,
                title = excluded.title
            "#,
            rusqlite::params![asset.id, asset.url, asset.mime_type, asset.title],
        )?;
        Ok(())
    }

    pub fn remove_asset(&self, id: i64) -> Result<bool> {
        let n = self.conn.execute("DELETE FROM assets WHERE id = ?", [id])?;
        Ok(n > 0)
    }

    pub fn get_asset(&self, id: i64) -> Result<Option<Asset>> {
        let result = self.conn.query_row(
            "SELECT id, url, mime_type, title FROM assets WHERE id = ?",
            [id],
            |row| {
                Ok(Asset {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    mime_type: row.get(2)?,
                    title: row.get(3)?,
                })
            },
        );
        match result {
            Ok(asset) => Ok(Some(asset)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_asset_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM assets ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    pub fn set_content_meta(&self, content_id: i64, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO content_meta (content_id, meta_key, meta_value) VALUES (?, ?, ?)",
            rusqlite::params![content_id, key, value],
        )?;
        Ok(())
    }

    pub fn set_site_option(&self, name: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO site_options (name, value) VALUES (?, ?)",
            rusqlite::params![name, value],
        )?;
        Ok(())
    }

    pub fn set_user_meta(&self, user_id: i64, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO user_meta (user_id, meta_key, meta_value) VALUES (?, ?, ?)",
            rusqlite::params![user_id, key, value],
        )?;
        Ok(())
    }

    fn find_asset_by_variants(&self, raw: &str) -> Result<Option<i64>> {
        for candidate in url_variants(raw) {
            let found = self.conn.query_row(
                "SELECT id FROM assets WHERE url = ? ORDER BY id LIMIT 1",
                [&candidate],
                |row| row.get::<_, i64>(0),
            );
            match found {
                Ok(id) => return Ok(Some(id)),
                Err(rusqlite::Error::QueryReturnedNoRows) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

impl ContentHost for Database {
    fn content_item(&self, id: i64) -> Result<Option<ContentItem>> {
        self.get_content_item(id)
    }

    fn asset(&self, id: i64) -> Result<Option<Asset>> {
        self.get_asset(id)
    }

    fn resolve_asset_by_url(&self, url: &str) -> Result<Option<i64>> {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        if let Some(id) = self.find_asset_by_variants(without_query)? {
            return Ok(Some(id));
        }
        let original = SIZE_SUFFIX.replace(without_query, "$1");
        if original != without_query {
            return self.find_asset_by_variants(&original);
        }
        Ok(None)
    }

    fn resolve_content_by_url(&self, url: &str) -> Result<Option<i64>> {
        let Ok(parsed) = Url::parse(url.trim()) else {
            return Ok(None);
        };

        for (key, value) in parsed.query_pairs() {
            if !ID_QUERY_KEYS.contains(&key.as_ref()) {
                continue;
            }
            if let Ok(id) = value.parse::<i64>() {
                if id > 0 && self.content_exists(id)? {
                    return Ok(Some(id));
                }
            }
        }

        for candidate in url_variants(url) {
            let found = self.conn.query_row(
                "SELECT id FROM content_items WHERE url = ? AND state != 'deleted' ORDER BY id LIMIT 1",
                [&candidate],
                |row| row.get::<_, i64>(0),
            );
            match found {
                Ok(id) => return Ok(Some(id)),
                Err(rusqlite::Error::QueryReturnedNoRows) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn seed(db: &Database) {
        db.put_asset(&Asset {
            id: 5,
            url: "https://example.org/uploads/photo.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            title: Some("Photo".to_string()),
        })
        .unwrap();
        db.put_content_item(&ContentItem {
            id: 4,
            title: "Hello".to_string(),
            body: String::new(),
            url: Some("https://example.org/hello-world/".to_string()),
            state: ContentState::Published,
            representative_asset_id: Some(5),
        })
        .unwrap();
    }

    #[test]
    fn test_url_variants_cover_scheme_and_slash() {
        let variants = url_variants("https://example.org/a/b/#top");
        assert!(variants.contains(&"https://example.org/a/b".to_string()));
        assert!(variants.contains(&"https://example.org/a/b/".to_string()));
        assert!(variants.contains(&"http://example.org/a/b".to_string()));
        assert!(variants.contains(&"http://example.org/a/b/".to_string()));
    }

    #[test]
    fn test_resolve_asset_by_url_variants() {
        let db = test_db();
        seed(&db);

        assert_eq!(
            db.resolve_asset_by_url("https://example.org/uploads/photo.jpg").unwrap(),
            Some(5)
        );
        assert_eq!(
            db.resolve_asset_by_url("http://example.org/uploads/photo-300x200.jpg?ver=2").unwrap(),
            Some(5)
        );
        assert_eq!(
            db.resolve_asset_by_url("https://example.org/uploads/other.jpg").unwrap(),
            None
        );
    }

    #[test]
    fn test_resolve_content_by_url_query_and_permalink() {
        let db = test_db();
        seed(&db);

        assert_eq!(db.resolve_content_by_url("https://example.org/?p=4").unwrap(), Some(4));
        assert_eq!(db.resolve_content_by_url("http://example.org/?page_id=4").unwrap(), Some(4));
        assert_eq!(db.resolve_content_by_url("https://example.org/hello-world").unwrap(), Some(4));
        assert_eq!(db.resolve_content_by_url("https://example.org/?p=99").unwrap(), None);
        assert_eq!(db.resolve_content_by_url("not a url").unwrap(), None);
    }

    #[test]
    fn test_deleted_items_do_not_resolve() {
        let db = test_db();
        seed(&db);
        db.set_content_state(4, ContentState::Deleted).unwrap();

        assert!(!db.content_exists(4).unwrap());
        assert_eq!(db.resolve_content_by_url("https://example.org/?p=4").unwrap(), None);
    }

    #[test]
    fn test_host_defaults_read_through_item() {
        let db = test_db();
        seed(&db);
        assert_eq!(db.representative_asset(4).unwrap(), Some(5));
        assert_eq!(
            db.content_url(4).unwrap().as_deref(),
            Some("https://example.org/hello-world/")
        );
        assert_eq!(
            db.resolve_url_by_asset(5).unwrap().as_deref(),
            Some("https://example.org/uploads/photo.jpg")
        );
    }
}
