//! URL ↔ id lookups with a small memo in front of the host.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use crate::host::ContentHost;

/// Resolves asset references found in markup.
///
/// Misses are cached too: a page full of external images should cost one
/// host lookup per distinct URL, not one per occurrence.
pub struct Resolver<'a, H: ContentHost + ?Sized> {
    host: &'a H,
    origin: Option<Url>,
    cache: RefCell<HashMap<String, Option<i64>>>,
}

impl<'a, H: ContentHost + ?Sized> Resolver<'a, H> {
    /// `origin` anchors relative references; an unparsable origin leaves them unresolved.
    pub fn new(host: &'a H, origin: &str) -> Self {
        Self {
            host,
            origin: Url::parse(origin).ok(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &'a H {
        self.host
    }

    /// Absolute http(s) form of a reference taken from markup.
    pub fn absolutize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") || raw.starts_with('#') {
            return None;
        }
        let parsed = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => self.origin.as_ref()?.join(raw).ok()?,
            Err(_) => return None,
        };
        match parsed.scheme() {
            "http" | "https" => Some(parsed.to_string()),
            _ => None,
        }
    }

    pub fn asset_id_for_url(&self, raw: &str) -> Result<Option<i64>> {
        let Some(url) = self.absolutize(raw) else {
            return Ok(None);
        };
        if let Some(hit) = self.cache.borrow().get(&url) {
            return Ok(*hit);
        }
        let resolved = self.host.resolve_asset_by_url(&url)?;
        if resolved.is_none() {
            debug!(url = %url, "No asset matches URL");
        }
        self.cache.borrow_mut().insert(url, resolved);
        Ok(resolved)
    }

    pub fn url_for_asset(&self, asset_id: i64) -> Result<Option<String>> {
        if asset_id <= 0 {
            return Ok(None);
        }
        self.host.resolve_url_by_asset(asset_id)
    }

    pub fn content_id_for_url(&self, url: &str) -> Result<Option<i64>> {
        self.host.resolve_content_by_url(url)
    }

    pub fn is_image_asset(&self, asset_id: i64) -> Result<bool> {
        Ok(self.host.asset(asset_id)?.map(|a| a.is_image()).unwrap_or(false))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }
}
