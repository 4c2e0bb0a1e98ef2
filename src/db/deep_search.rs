//! Storage side of the deep search: pattern lookups over the auxiliary
//! tables and the per-asset result cache.

use anyhow::Result;

use super::Database;

/// A value in auxiliary storage that mentions an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaMatch {
    /// Content item id, user id, or `None` for site options.
    pub owner_id: Option<i64>,
    pub key: String,
    /// The stored value, so callers can confirm the match exactly.
    pub value: String,
}

/// SQL `LIKE` pattern for a literal substring (`\` escapes).
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Database {
    fn find_matching<F>(&self, sql: &str, needles: &[String], map: F) -> Result<Vec<MetaMatch>>
    where
        F: Fn(&rusqlite::Row) -> rusqlite::Result<MetaMatch>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let mut found: Vec<MetaMatch> = Vec::new();
        for needle in needles.iter().filter(|n| !n.is_empty()) {
            let rows: Vec<MetaMatch> = stmt
                .query_map([like_pattern(needle)], &map)?
                .filter_map(|r| r.ok())
                .collect();
            for row in rows {
                if !found.contains(&row) {
                    found.push(row);
                }
            }
        }
        Ok(found)
    }

    pub fn find_content_meta_matching(&self, needles: &[String]) -> Result<Vec<MetaMatch>> {
        self.find_matching(
            r"SELECT content_id, meta_key, meta_value FROM content_meta
              WHERE meta_value LIKE ? ESCAPE '\' ORDER BY content_id, meta_key",
            needles,
            |row| {
                Ok(MetaMatch {
                    owner_id: Some(row.get(0)?),
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            },
        )
    }

    pub fn find_site_options_matching(&self, needles: &[String]) -> Result<Vec<MetaMatch>> {
        self.find_matching(
            r"SELECT name, value FROM site_options WHERE value LIKE ? ESCAPE '\' ORDER BY name",
            needles,
            |row| {
                Ok(MetaMatch {
                    owner_id: None,
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            },
        )
    }

    pub fn find_user_meta_matching(&self, needles: &[String]) -> Result<Vec<MetaMatch>> {
        self.find_matching(
            r"SELECT user_id, meta_key, meta_value FROM user_meta
              WHERE meta_value LIKE ? ESCAPE '\' ORDER BY user_id, meta_key",
            needles,
            |row| {
                Ok(MetaMatch {
                    owner_id: Some(row.get(0)?),
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            },
        )
    }

    /// Non-deleted content items whose stored body contains any needle, ascending.
    pub fn find_content_bodies_matching(&self, needles: &[String]) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            r"SELECT id FROM content_items
              WHERE state != 'deleted' AND body LIKE ? ESCAPE '\' ORDER BY id",
        )?;
        let mut ids: Vec<i64> = Vec::new();
        for needle in needles.iter().filter(|n| !n.is_empty()) {
            let rows: Vec<i64> = stmt
                .query_map([like_pattern(needle)], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            ids.extend(rows);
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    pub fn put_deep_search_bundle(&self, asset_id: i64, bundle_json: &str, when: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO deep_search_cache (asset_id, bundle, searched_at) VALUES (?, ?, ?)
            ON CONFLICT (asset_id) DO UPDATE SET
                bundle = excluded.bundle,
                searched_at = excluded.searched_at
            "#,
            rusqlite::params![asset_id, bundle_json, when],
        )?;
        Ok(())
    }

    /// Cached bundle JSON and the time it was computed.
    pub fn get_deep_search_bundle(&self, asset_id: i64) -> Result<Option<(String, i64)>> {
        let result = self.conn.query_row(
            "SELECT bundle, searched_at FROM deep_search_cache WHERE asset_id = ?",
            [asset_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
        match result {
            Ok(found) => Ok(Some(found)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_deep_search_bundle(&self, asset_id: i64) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM deep_search_cache WHERE asset_id = ?", [asset_id])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("a_b%c"), r"%a\_b\%c%");
    }

    #[test]
    fn test_auxiliary_lookups() {
        let db = test_db();
        db.set_content_meta(3, "_hero", "https://example.org/uploads/a5.jpg").unwrap();
        db.set_content_meta(4, "_hero", "https://example.org/uploads/a55.jpg").unwrap();
        db.set_site_option("site_logo", "5").unwrap();
        db.set_site_option("header_image", "/uploads/a5.jpg").unwrap();
        db.set_user_meta(1, "avatar", "https://example.org/uploads/a5.jpg?s=96").unwrap();

        let needles = vec!["/uploads/a5.jpg".to_string()];
        let meta = db.find_content_meta_matching(&needles).unwrap();
        assert_eq!(
            meta,
            vec![MetaMatch {
                owner_id: Some(3),
                key: "_hero".to_string(),
                value: "https://example.org/uploads/a5.jpg".to_string(),
            }]
        );
        let options = db.find_site_options_matching(&needles).unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].key, "header_image");
        assert_eq!(db.find_user_meta_matching(&needles).unwrap().len(), 1);
    }

    #[test]
    fn test_bundle_cache_roundtrip() {
        let db = test_db();
        assert_eq!(db.get_deep_search_bundle(5).unwrap(), None);
        db.put_deep_search_bundle(5, "{}", 10).unwrap();
        db.put_deep_search_bundle(5, "{\"posts\":[]}", 20).unwrap();
        assert_eq!(
            db.get_deep_search_bundle(5).unwrap(),
            Some(("{\"posts\":[]}".to_string(), 20))
        );
        assert!(db.delete_deep_search_bundle(5).unwrap());
        assert!(!db.delete_deep_search_bundle(5).unwrap());
    }
}
