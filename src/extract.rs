//! Finding asset references in markup.
//!
//! Extractors only find candidate references. [`ExtractorChain`] runs them in
//! order, resolves URLs to asset ids and merges the result. Both the
//! synchronizer (stored bodies) and the crawler (fetched pages) go through it.

use anyhow::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

use crate::host::ContentHost;
use crate::resolver::Resolver;

static ID_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bwp-image-(\d+)\b").unwrap());

static ID_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bdata-asset-id\s*=\s*["']?(\d+)"#).unwrap());

static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());

static IMG_SOURCE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\b(src|data-src|srcset)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static BACKGROUND_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)background(?:-image)?\s*:[^;"'>]*?url\(\s*(?:&quot;|["'])?([^"')&]+)(?:&quot;|["'])?\s*\)"#)
        .unwrap()
});

static META_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());

static LINK_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").unwrap());

static TAG_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\b([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

/// `property`/`name` values of meta tags whose `content` is an image URL.
const IMAGE_META_NAMES: &[&str] = &[
    "og:image",
    "og:image:url",
    "og:image:secure_url",
    "twitter:image",
    "twitter:image:src",
    "msapplication-tileimage",
];

/// `rel` tokens of link tags whose `href` is an image.
const IMAGE_LINK_RELS: &[&str] = &["icon", "apple-touch-icon", "apple-touch-icon-precomposed", "image_src", "mask-icon"];

static HEAD_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</head\s*>").unwrap());

/// A reference to an asset as written in the markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoundReference {
    /// Explicit id marker.
    Id(i64),
    /// URL that still has to be resolved.
    Url(String),
}

/// Pluggable source of asset references.
pub trait AssetExtractor {
    fn name(&self) -> &'static str;

    fn extract(&self, markup: &str) -> Vec<FoundReference>;
}

/// `class="wp-image-12"` and `data-asset-id="12"`.
pub struct IdMarkerExtractor;

impl AssetExtractor for IdMarkerExtractor {
    fn name(&self) -> &'static str {
        "id-marker"
    }

    fn extract(&self, markup: &str) -> Vec<FoundReference> {
        ID_CLASS
            .captures_iter(markup)
            .chain(ID_ATTR.captures_iter(markup))
            .filter_map(|caps| caps.get(1)?.as_str().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(FoundReference::Id)
            .collect()
    }
}

/// `<img src>` / `data-src` / `srcset` on tags that carry no id marker.
pub struct ImageTagExtractor;

impl ImageTagExtractor {
    fn push_urls(value: &str, is_srcset: bool, out: &mut Vec<FoundReference>) {
        if is_srcset {
            // "a.jpg 300w, b.jpg 2x": the URL is the first token of each candidate.
            for candidate in value.split(',') {
                if let Some(url) = candidate.split_whitespace().next() {
                    out.push(FoundReference::Url(url.to_string()));
                }
            }
        } else if !value.trim().is_empty() {
            out.push(FoundReference::Url(value.trim().to_string()));
        }
    }
}

impl AssetExtractor for ImageTagExtractor {
    fn name(&self) -> &'static str {
        "img-tag"
    }

    fn extract(&self, markup: &str) -> Vec<FoundReference> {
        let mut out = Vec::new();
        for tag in IMG_TAG.find_iter(markup) {
            let tag = tag.as_str();
            if ID_CLASS.is_match(tag) || ID_ATTR.is_match(tag) {
                continue;
            }
            for caps in IMG_SOURCE_ATTR.captures_iter(tag) {
                let attr = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
                let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
                if let (Some(attr), Some(value)) = (attr, value) {
                    Self::push_urls(value, attr == "srcset", &mut out);
                }
            }
        }
        out
    }
}

/// Inline `background-image: url(...)` styles.
pub struct BackgroundImageExtractor;

impl AssetExtractor for BackgroundImageExtractor {
    fn name(&self) -> &'static str {
        "background-image"
    }

    fn extract(&self, markup: &str) -> Vec<FoundReference> {
        BACKGROUND_URL
            .captures_iter(markup)
            .filter_map(|caps| caps.get(1))
            .map(|m| FoundReference::Url(m.as_str().trim().to_string()))
            .collect()
    }
}

/// Social-card meta tags and icon links, as emitted in a page `<head>`.
pub struct HeadMetadataExtractor;

impl HeadMetadataExtractor {
    /// Lowercased attribute names mapped to their values for one tag.
    fn attrs(tag: &str) -> Vec<(String, String)> {
        TAG_ATTR
            .captures_iter(tag)
            .filter_map(|caps| {
                let name = caps.get(1)?.as_str().to_ascii_lowercase();
                let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4))?;
                Some((name, value.as_str().trim().to_string()))
            })
            .collect()
    }

    fn attr<'t>(attrs: &'t [(String, String)], name: &str) -> Option<&'t str> {
        attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    fn is_image_meta(attrs: &[(String, String)]) -> bool {
        ["property", "name"].iter().any(|key| {
            Self::attr(attrs, key)
                .is_some_and(|v| IMAGE_META_NAMES.contains(&v.to_ascii_lowercase().as_str()))
        })
    }

    fn is_image_link(attrs: &[(String, String)]) -> bool {
        let Some(rel) = Self::attr(attrs, "rel") else {
            return false;
        };
        let rel = rel.to_ascii_lowercase();
        let mut tokens = rel.split_whitespace();
        if tokens.clone().any(|t| IMAGE_LINK_RELS.contains(&t)) {
            return true;
        }
        tokens.any(|t| t == "preload")
            && Self::attr(attrs, "as").is_some_and(|v| v.eq_ignore_ascii_case("image"))
    }
}

impl AssetExtractor for HeadMetadataExtractor {
    fn name(&self) -> &'static str {
        "head-metadata"
    }

    fn extract(&self, markup: &str) -> Vec<FoundReference> {
        let metas = META_TAG.find_iter(markup).filter_map(|tag| {
            let attrs = Self::attrs(tag.as_str());
            if !Self::is_image_meta(&attrs) {
                return None;
            }
            Self::attr(&attrs, "content").map(str::to_string)
        });
        let links = LINK_TAG.find_iter(markup).filter_map(|tag| {
            let attrs = Self::attrs(tag.as_str());
            if !Self::is_image_link(&attrs) {
                return None;
            }
            Self::attr(&attrs, "href").map(str::to_string)
        });
        metas
            .chain(links)
            .filter(|url| !url.is_empty())
            .map(FoundReference::Url)
            .collect()
    }
}

/// Ordered list of extractors plus the resolution and filtering rules.
pub struct ExtractorChain {
    extractors: Vec<Box<dyn AssetExtractor>>,
    images_only: bool,
}

impl ExtractorChain {
    pub fn new(images_only: bool) -> Self {
        Self {
            extractors: Vec::new(),
            images_only,
        }
    }

    /// Id markers first, then unmarked image tags, inline backgrounds and
    /// head metadata.
    pub fn with_defaults(images_only: bool) -> Self {
        Self::new(images_only)
            .with_extractor(Box::new(IdMarkerExtractor))
            .with_extractor(Box::new(ImageTagExtractor))
            .with_extractor(Box::new(BackgroundImageExtractor))
            .with_extractor(Box::new(HeadMetadataExtractor))
    }

    pub fn with_extractor(mut self, extractor: Box<dyn AssetExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn extractor_names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    /// Distinct asset ids referenced by `markup`, in first-seen order.
    ///
    /// References that do not resolve, or that point at missing or
    /// (with `images_only`) non-image assets, are dropped.
    pub fn extract_asset_ids<H: ContentHost + ?Sized>(
        &self,
        markup: &str,
        resolver: &Resolver<'_, H>,
    ) -> Result<Vec<i64>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        for extractor in &self.extractors {
            for reference in extractor.extract(markup) {
                let asset_id = match &reference {
                    FoundReference::Id(id) => Some(*id),
                    FoundReference::Url(url) => resolver.asset_id_for_url(url)?,
                };
                let Some(asset_id) = asset_id else {
                    debug!(extractor = extractor.name(), ?reference, "Dropping unresolvable reference");
                    continue;
                };
                if asset_id <= 0 || seen.contains(&asset_id) {
                    continue;
                }
                if !self.accepts(asset_id, resolver)? {
                    debug!(extractor = extractor.name(), asset_id, "Dropping filtered asset");
                    // Remember the rejection so later extractors don't re-check it.
                    seen.insert(asset_id);
                    continue;
                }
                seen.insert(asset_id);
                ids.push(asset_id);
            }
        }
        Ok(ids)
    }

    fn accepts<H: ContentHost + ?Sized>(&self, asset_id: i64, resolver: &Resolver<'_, H>) -> Result<bool> {
        if self.images_only {
            resolver.is_image_asset(asset_id)
        } else {
            resolver.host().asset_exists(asset_id)
        }
    }
}

/// Split a fetched page at `</head>`; pages without one are all body.
pub fn split_head_body(html: &str) -> (&str, &str) {
    match HEAD_END.find(html) {
        Some(end) => html.split_at(end.end()),
        None => ("", html),
    }
}
