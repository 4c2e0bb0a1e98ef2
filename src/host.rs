//! Interface to the content-management host.
//!
//! The host owns content items and assets. This crate only reads ids, bodies,
//! URLs and MIME types through [`ContentHost`]; the SQLite mirror in
//! [`crate::db`] is the implementation the binaries use.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentState {
    Draft,
    Published,
    Deleted,
}

impl ContentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentState::Draft => "draft",
            ContentState::Published => "published",
            ContentState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ContentState::Draft),
            "published" => Some(ContentState::Published),
            "deleted" => Some(ContentState::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    pub body: String,
    /// Permalink; `None` for items that are not publicly addressable.
    pub url: Option<String>,
    pub state: ContentState,
    /// Cover image or similar designated asset.
    pub representative_asset_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub url: String,
    pub mime_type: String,
    pub title: Option<String>,
}

impl Asset {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Lookups the index needs from the host.
pub trait ContentHost {
    fn content_item(&self, id: i64) -> Result<Option<ContentItem>>;

    fn asset(&self, id: i64) -> Result<Option<Asset>>;

    /// Asset whose canonical URL (or a resized variant of it) is `url`.
    fn resolve_asset_by_url(&self, url: &str) -> Result<Option<i64>>;

    fn resolve_url_by_asset(&self, id: i64) -> Result<Option<String>> {
        Ok(self.asset(id)?.map(|a| a.url))
    }

    /// Content item addressed by `url`, either by id query or by permalink.
    fn resolve_content_by_url(&self, url: &str) -> Result<Option<i64>>;

    fn content_url(&self, id: i64) -> Result<Option<String>> {
        Ok(self.content_item(id)?.and_then(|c| c.url))
    }

    fn representative_asset(&self, id: i64) -> Result<Option<i64>> {
        Ok(self
            .content_item(id)?
            .and_then(|c| c.representative_asset_id))
    }

    fn content_exists(&self, id: i64) -> Result<bool> {
        Ok(self
            .content_item(id)?
            .map(|c| c.state != ContentState::Deleted)
            .unwrap_or(false))
    }

    fn asset_exists(&self, id: i64) -> Result<bool> {
        Ok(self.asset(id)?.is_some())
    }
}
