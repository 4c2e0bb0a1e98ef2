//! "Where is this asset used": one list merged from the association index,
//! the cached deep search and the inverse snapshot.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::{Database, MetaMatch, Position};
use crate::deep_search;
use crate::host::ContentHost;

/// A content item that uses the asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageHit {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Only index-sourced hits know where on the page the asset was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// A mention in auxiliary storage (meta value, site option, user meta).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxHit {
    /// Content item or user id; absent for site options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    pub key: String,
}

impl From<MetaMatch> for AuxHit {
    fn from(m: MetaMatch) -> Self {
        Self {
            owner_id: m.owner_id,
            key: m.key,
        }
    }
}

/// Result of a deep search, as cached per asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepSearchBundle {
    #[serde(default)]
    pub posts: Vec<UsageHit>,
    #[serde(default)]
    pub postmetas: Vec<AuxHit>,
    #[serde(default)]
    pub options: Vec<AuxHit>,
    #[serde(default)]
    pub usermetas: Vec<AuxHit>,
    #[serde(default)]
    pub searched_at: i64,
}

/// Presentation-ready usage of one asset.
///
/// `posts` is `None` when no source contributed a single item, which is
/// different from a search that ran and found nothing elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CombinedUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posts: Option<Vec<UsageHit>>,
    pub postmetas: Vec<AuxHit>,
    pub options: Vec<AuxHit>,
    pub usermetas: Vec<AuxHit>,
}

impl CombinedUsage {
    pub fn post_count(&self) -> usize {
        self.posts.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Merge the three sources: deep search first, then the index, then legacy rows.
///
/// Duplicate ids keep the first copy as is; nothing from later copies is merged in.
pub fn combine(
    index_rows: &[UsageHit],
    deep_search: Option<&DeepSearchBundle>,
    legacy_rows: &[UsageHit],
) -> CombinedUsage {
    let deep_posts = deep_search.map(|b| b.posts.as_slice()).unwrap_or_default();

    let mut seen = HashSet::new();
    let posts: Vec<UsageHit> = deep_posts
        .iter()
        .chain(index_rows)
        .chain(legacy_rows)
        .filter(|hit| seen.insert(hit.id))
        .cloned()
        .collect();

    CombinedUsage {
        posts: (!posts.is_empty()).then_some(posts),
        postmetas: deep_search.map(|b| b.postmetas.clone()).unwrap_or_default(),
        options: deep_search.map(|b| b.options.clone()).unwrap_or_default(),
        usermetas: deep_search.map(|b| b.usermetas.clone()).unwrap_or_default(),
    }
}

/// Gather all three sources for `asset_id` and combine them.
pub fn collect_usage<H: ContentHost + ?Sized>(
    db: &Database,
    host: &H,
    asset_id: i64,
) -> Result<CombinedUsage> {
    let mut index_rows = Vec::new();
    for row in db.get_associations_for_asset(asset_id)? {
        if let Some(mut hit) = content_hit(host, row.content_id)? {
            hit.position = Some(row.position);
            index_rows.push(hit);
        }
    }

    let mut legacy_rows = Vec::new();
    for content_id in db.get_asset_snapshot(asset_id)? {
        if let Some(hit) = content_hit(host, content_id)? {
            legacy_rows.push(hit);
        }
    }

    let bundle = deep_search::cached(db, asset_id)?;
    Ok(combine(&index_rows, bundle.as_ref(), &legacy_rows))
}

/// Hit for a live content item; `None` for deleted or unknown ids.
pub(crate) fn content_hit<H: ContentHost + ?Sized>(
    host: &H,
    content_id: i64,
) -> Result<Option<UsageHit>> {
    if !host.content_exists(content_id)? {
        return Ok(None);
    }
    Ok(host.content_item(content_id)?.map(|item| UsageHit {
        id: item.id,
        title: Some(item.title),
        url: item.url,
        position: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, position: Option<Position>) -> UsageHit {
        UsageHit {
            id,
            title: Some(format!("Item {}", id)),
            url: None,
            position,
        }
    }

    fn aux(key: &str) -> AuxHit {
        AuxHit {
            owner_id: None,
            key: key.to_string(),
        }
    }

    #[test]
    fn test_order_and_first_occurrence_wins() {
        let index = vec![hit(2, Some(Position::Head)), hit(1, Some(Position::Content))];
        let bundle = DeepSearchBundle {
            posts: vec![hit(1, None)],
            options: vec![aux("site_logo")],
            ..Default::default()
        };
        let legacy = vec![hit(3, None), hit(2, None)];

        let combined = combine(&index, Some(&bundle), &legacy);
        let posts = combined.posts.unwrap();
        let ids: Vec<i64> = posts.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // The deep-search copy of 1 wins; the index position is not merged in.
        assert_eq!(posts[0].position, None);
        assert_eq!(posts[1].position, Some(Position::Head));
        assert_eq!(combined.options, vec![aux("site_logo")]);
    }

    #[test]
    fn test_posts_key_omitted_when_empty() {
        let bundle = DeepSearchBundle {
            usermetas: vec![aux("avatar")],
            ..Default::default()
        };
        let combined = combine(&[], Some(&bundle), &[]);
        assert_eq!(combined.posts, None);
        assert_eq!(combined.usermetas.len(), 1);

        let json = serde_json::to_value(&combined).unwrap();
        assert!(json.get("posts").is_none());
        assert!(json.get("usermetas").is_some());

        let combined = combine(&[], None, &[]);
        assert_eq!(combined, CombinedUsage::default());
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let index = vec![hit(1, Some(Position::Body)), hit(1, Some(Position::Head))];
        let bundle = DeepSearchBundle {
            posts: vec![hit(4, None), hit(1, None)],
            postmetas: vec![aux("_thumb")],
            ..Default::default()
        };
        let legacy = vec![hit(4, None)];
        let (index_before, bundle_before, legacy_before) =
            (index.clone(), bundle.clone(), legacy.clone());

        let combined = combine(&index, Some(&bundle), &legacy);
        assert_eq!(combined.post_count(), 2);
        assert_eq!(index, index_before);
        assert_eq!(bundle, bundle_before);
        assert_eq!(legacy, legacy_before);
    }
}
