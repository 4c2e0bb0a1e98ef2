//! Slow search for asset mentions outside the indexed bodies.
//!
//! Looks through content meta, site options, user meta and stored bodies for
//! the asset's URL path or id marker. Meant to run from the scheduler; the
//! result is cached per asset and read back by the aggregator.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::aggregate::{content_hit, AuxHit, DeepSearchBundle};
use crate::db::{unix_now, Database, MetaMatch};
use crate::host::ContentHost;

/// Strings that identify the asset in stored values.
fn needles(asset_url: &str, asset_id: i64) -> Vec<String> {
    let mut needles = Vec::new();
    match Url::parse(asset_url) {
        // The path alone also matches relative and other-scheme references.
        Ok(url) if url.path().len() > 1 => needles.push(url.path().to_string()),
        _ if !asset_url.is_empty() => needles.push(asset_url.to_string()),
        _ => {}
    }
    needles.push(format!("wp-image-{}", asset_id));
    needles
}

/// Run the search for one asset and cache the bundle.
///
/// Returns `None` for assets the host does not know.
pub fn run<H: ContentHost + ?Sized>(
    db: &Database,
    host: &H,
    asset_id: i64,
) -> Result<Option<DeepSearchBundle>> {
    let Some(asset) = host.asset(asset_id)? else {
        debug!(asset_id, "Deep search skipped, unknown asset");
        return Ok(None);
    };
    let needles = needles(&asset.url, asset_id);
    let matcher = MentionMatcher::new(&needles, asset_id)?;

    let mut posts = Vec::new();
    for content_id in db.find_content_bodies_matching(&needles)? {
        let Some(item) = host.content_item(content_id)? else {
            continue;
        };
        if !matcher.mentions(&item.body) {
            continue;
        }
        if let Some(hit) = content_hit(host, content_id)? {
            posts.push(hit);
        }
    }

    let bundle = DeepSearchBundle {
        posts,
        postmetas: matcher.confirmed(db.find_content_meta_matching(&needles)?),
        options: matcher.confirmed(db.find_site_options_matching(&needles)?),
        usermetas: matcher.confirmed(db.find_user_meta_matching(&needles)?),
        searched_at: unix_now(),
    };

    let json = serde_json::to_string(&bundle)?;
    db.put_deep_search_bundle(asset_id, &json, bundle.searched_at)?;
    info!(
        asset_id,
        posts = bundle.posts.len(),
        postmetas = bundle.postmetas.len(),
        options = bundle.options.len(),
        usermetas = bundle.usermetas.len(),
        "Deep search finished"
    );
    Ok(Some(bundle))
}

/// Re-checks LIKE candidates: the id marker must match on word boundaries,
/// so a search for 5 does not pick up `wp-image-55`.
struct MentionMatcher<'a> {
    literals: &'a [String],
    exact_marker: Regex,
}

impl<'a> MentionMatcher<'a> {
    /// `needles` ends with the id marker; everything before it is matched literally.
    fn new(needles: &'a [String], asset_id: i64) -> Result<Self> {
        Ok(Self {
            literals: &needles[..needles.len().saturating_sub(1)],
            exact_marker: Regex::new(&format!(r"\bwp-image-{}\b", asset_id))?,
        })
    }

    fn mentions(&self, value: &str) -> bool {
        self.literals.iter().any(|n| value.contains(n.as_str())) || self.exact_marker.is_match(value)
    }

    fn confirmed(&self, matches: Vec<MetaMatch>) -> Vec<AuxHit> {
        matches
            .into_iter()
            .filter(|m| self.mentions(&m.value))
            .map(AuxHit::from)
            .collect()
    }
}

/// Last cached bundle for `asset_id`, if a search ever ran.
pub fn cached(db: &Database, asset_id: i64) -> Result<Option<DeepSearchBundle>> {
    let Some((json, searched_at)) = db.get_deep_search_bundle(asset_id)? else {
        return Ok(None);
    };
    let mut bundle: DeepSearchBundle = serde_json::from_str(&json)
        .with_context(|| format!("Corrupt deep search bundle for asset {}", asset_id))?;
    bundle.searched_at = searched_at;
    Ok(Some(bundle))
}

/// Run the search for every known asset. Returns how many were searched.
pub fn run_all<H: ContentHost + ?Sized>(db: &Database, host: &H) -> Result<usize> {
    let mut searched = 0;
    for asset_id in db.list_asset_ids()? {
        if run(db, host, asset_id)?.is_some() {
            searched += 1;
        }
    }
    Ok(searched)
}
