//! URL normalization and redirect classification.
//!
//! Both are pure functions so the crawler can be reasoned about (and tested)
//! without a network.

use url::Url;

/// Query parameter appended to defeat caches in "index any URL" mode.
pub const CACHE_BUST_PARAM: &str = "assetusage-nocache";

/// Canonical form used to compare a requested URL with where it ended up.
///
/// Drops the cache-busting parameter, the fragment and a trailing path slash.
/// Every other query parameter is kept, in order. `None` for anything that
/// is not an absolute URL with a host.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?;

    let mut out = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path().trim_end_matches('/'));

    let query: Vec<&str> = url
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split('=').next() != Some(CACHE_BUST_PARAM))
        .collect();
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query.join("&"));
    }
    Some(out)
}

/// `url` with the cache-busting parameter set to `token`.
pub fn add_cache_bust(url: &Url, token: i64) -> String {
    let mut busted = url.clone();
    busted
        .query_pairs_mut()
        .append_pair(CACHE_BUST_PARAM, &token.to_string());
    busted.to_string()
}

/// Whether the page served for `original` may belong to a different content item.
///
/// Scheme switches, trailing slashes and permalink rewrites that `resolve`
/// maps to the same content id are benign. Changed hosts or ports, landing on
/// the site root, and anything that cannot be parsed or resolved are not.
pub fn is_problematic_redirect<F>(original: &str, final_url: &str, resolve: F) -> bool
where
    F: Fn(&str) -> Option<i64>,
{
    let (Ok(from), Ok(to)) = (Url::parse(original.trim()), Url::parse(final_url.trim())) else {
        return true;
    };
    let (Some(norm_from), Some(norm_to)) = (normalize_url(original), normalize_url(final_url))
    else {
        return true;
    };
    if norm_from == norm_to {
        return false;
    }
    if from.host_str() != to.host_str() || from.port() != to.port() {
        return true;
    }
    if without_scheme(&norm_from) == without_scheme(&norm_to) {
        return false;
    }
    if is_root(&norm_to) && !is_root(&norm_from) {
        return true;
    }
    match (resolve(original), resolve(final_url)) {
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

fn without_scheme(normalized: &str) -> &str {
    normalized
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(normalized)
}

/// Host only: no path, no query.
fn is_root(normalized: &str) -> bool {
    !without_scheme(normalized).contains(['/', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_query_id(url: &str) -> Option<i64> {
        let parsed = Url::parse(url).ok()?;
        parsed
            .query_pairs()
            .find(|(k, _)| k == "p")
            .and_then(|(_, v)| v.parse().ok())
            .or_else(|| parsed.path().contains("/pretty/").then_some(4))
    }

    #[test]
    fn test_normalize_strips_bust_fragment_and_slash() {
        assert_eq!(
            normalize_url("https://Example.org/a/b/?x=1&assetusage-nocache=99&y=2#top").as_deref(),
            Some("https://example.org/a/b?x=1&y=2")
        );
        assert_eq!(
            normalize_url("http://example.org:8080/").as_deref(),
            Some("http://example.org:8080")
        );
        assert_eq!(normalize_url("/relative/path"), None);
        assert_eq!(normalize_url("mailto:a@example.org"), None);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in [
            "https://example.org/",
            "https://example.org/a/b/?x=1&y=2#frag",
            "http://example.org:8080/?p=4&assetusage-nocache=1",
            "https://example.org/path?b=2&a=1",
        ] {
            let once = normalize_url(raw).unwrap();
            assert_eq!(normalize_url(&once).as_deref(), Some(once.as_str()), "{}", raw);
        }
    }

    #[test]
    fn test_redirect_to_other_item_is_problematic() {
        assert!(is_problematic_redirect(
            "http://host/?p=4",
            "http://host/?p=5",
            by_query_id
        ));
    }

    #[test]
    fn test_scheme_and_slash_changes_are_benign() {
        assert!(!is_problematic_redirect(
            "http://host/?p=4",
            "https://host/?p=4",
            by_query_id
        ));
        assert!(!is_problematic_redirect(
            "https://host/hello",
            "https://host/hello/",
            |_| None
        ));
        assert!(!is_problematic_redirect(
            "https://host/hello/",
            "https://host/hello/?assetusage-nocache=17",
            |_| None
        ));
    }

    #[test]
    fn test_permalink_rewrite_to_same_item_is_benign() {
        assert!(!is_problematic_redirect(
            "https://host/?p=4",
            "https://host/pretty/permalink/",
            by_query_id
        ));
    }

    #[test]
    fn test_host_port_root_and_unknown_targets_are_problematic() {
        assert!(is_problematic_redirect("https://host/a", "https://cdn.host/a", |_| Some(1)));
        assert!(is_problematic_redirect("https://host/a", "https://host:8443/a", |_| Some(1)));
        assert!(is_problematic_redirect("https://host/a", "https://host/", |_| Some(1)));
        assert!(is_problematic_redirect("https://host/a", "https://host/b", |_| None));
        assert!(is_problematic_redirect("not a url", "https://host/b", |_| Some(1)));
        assert!(!is_problematic_redirect("https://host/", "https://host", |_| None));
    }
}
