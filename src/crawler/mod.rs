//! Rendered-page crawler.
//!
//! Fetches each content item's public page, records the assets found in the
//! `<head>` and the rest of the page as `head`/`body` rows, and marks the item
//! scanned whatever the outcome. Targets are processed one at a time.

pub mod fetch;
pub mod redirect;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, CrawlerConfig, SiteConfig};
use crate::db::{unix_now, BulkUpsertCounts, Database, Position, ScanStatus, ScanTarget, TargetMode};
use crate::extract::{split_head_body, ExtractorChain};
use crate::host::ContentHost;
use crate::resolver::Resolver;

pub use fetch::{FetchError, PageFetcher, RawResponse, UreqFetcher};
pub use redirect::{add_cache_bust, is_problematic_redirect, normalize_url, CACHE_BUST_PARAM};

/// Why a target produced no rows.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid content id {0}")]
    InvalidId(i64),

    #[error("content item {0} is the posts index")]
    PostsIndex(i64),

    #[error("content item {0} has no URL")]
    NoUrl(i64),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("server answered HTTP {0}")]
    HttpStatus(u16),

    #[error("'{original}' redirected to '{final_url}'")]
    ProblematicRedirect {
        original: String,
        final_url: String,
        code: u16,
    },

    #[error("page is an aggregate asset listing")]
    AggregateView { code: u16 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ScanError {
    /// Scan status recorded for this failure.
    pub fn status(&self) -> ScanStatus {
        match self {
            ScanError::PostsIndex(_)
            | ScanError::ProblematicRedirect { .. }
            | ScanError::AggregateView { .. } => ScanStatus::Skipped,
            _ => ScanStatus::Failed,
        }
    }

    /// HTTP status of the response that was rejected, if one arrived.
    pub fn http_code(&self) -> Option<u16> {
        match self {
            ScanError::HttpStatus(code)
            | ScanError::ProblematicRedirect { code, .. }
            | ScanError::AggregateView { code } => Some(*code),
            _ => None,
        }
    }
}

/// A successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub code: u16,
    pub body: String,
    pub final_url: String,
    pub is_problematic_redirect: bool,
}

/// One record per scanned target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemScanResult {
    pub content_id: i64,
    pub url: String,
    pub status: ScanStatus,
    pub http_code: Option<u16>,
    pub head: BulkUpsertCounts,
    pub body: BulkUpsertCounts,
    pub error: Option<String>,
}

impl ItemScanResult {
    fn failed(target: &ScanTarget, error: &ScanError) -> Self {
        Self {
            content_id: target.content_id,
            url: target.url.clone(),
            status: error.status(),
            http_code: error.http_code(),
            head: BulkUpsertCounts::default(),
            body: BulkUpsertCounts::default(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CrawlProgress {
    Started { total: usize },
    Scanning { current: usize, total: usize, url: String },
    Completed { confirmed: usize, failed: usize, skipped: usize },
    Cancelled { processed: usize },
}

/// Totals for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub targets: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Offset for the next batch, `None` once the target list is exhausted.
    pub next_offset: Option<usize>,
    pub results: Vec<ItemScanResult>,
}

pub struct Crawler<'a, F: PageFetcher, H: ContentHost + ?Sized> {
    db: &'a Database,
    host: &'a H,
    fetcher: F,
    chain: ExtractorChain,
    crawler: CrawlerConfig,
    site: SiteConfig,
}

impl<'a, H: ContentHost + ?Sized> Crawler<'a, UreqFetcher, H> {
    pub fn with_ureq(db: &'a Database, host: &'a H, config: &Config) -> Self {
        Self::new(db, host, UreqFetcher::new(&config.crawler), config)
    }
}

impl<'a, F: PageFetcher, H: ContentHost + ?Sized> Crawler<'a, F, H> {
    pub fn new(db: &'a Database, host: &'a H, fetcher: F, config: &Config) -> Self {
        Self {
            db,
            host,
            fetcher,
            chain: ExtractorChain::with_defaults(config.index.images_only),
            crawler: config.crawler.clone(),
            site: config.site.clone(),
        }
    }

    pub fn with_chain(mut self, chain: ExtractorChain) -> Self {
        self.chain = chain;
        self
    }

    /// Fetch one page.
    ///
    /// Targets outside the origin are refused unless `index_any_url` is set.
    /// A privileged fetch (session cookie attached) is refused for any target
    /// whose scheme, host or port differs from the origin.
    pub fn fetch_content(&self, url: &str, privileged: bool) -> Result<FetchedPage, FetchError> {
        let target = Url::parse(url.trim()).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }
        let origin = Url::parse(&self.site.origin)
            .map_err(|_| FetchError::InvalidUrl(self.site.origin.clone()))?;

        if !self.crawler.index_any_url && target.host_str() != origin.host_str() {
            return Err(FetchError::OutsideOrigin(url.to_string()));
        }
        if privileged && target.origin() != origin.origin() {
            return Err(FetchError::CrossOriginPrivileged(url.to_string()));
        }

        let mut headers: Vec<(&str, &str)> = Vec::new();
        let request_url = if self.crawler.index_any_url {
            add_cache_bust(&target, unix_now())
        } else {
            headers.push(("Cache-Control", "no-cache, no-store, must-revalidate"));
            headers.push(("Pragma", "no-cache"));
            target.to_string()
        };
        if privileged {
            if let Some(cookie) = self.crawler.auth_cookie.as_deref() {
                headers.push(("Cookie", cookie));
            }
        }

        debug!(url = %request_url, privileged, "Fetching page");
        let response = self.fetcher.get(&request_url, &headers)?;

        let problematic = is_problematic_redirect(url, &response.final_url, |u| {
            self.host.resolve_content_by_url(u).ok().flatten()
        });
        if problematic {
            info!(from = url, to = %response.final_url, "Problematic redirect");
        }

        Ok(FetchedPage {
            code: response.status,
            body: response.body,
            final_url: response.final_url,
            is_problematic_redirect: problematic,
        })
    }

    /// Fetch one target and record its rendered-page assets.
    ///
    /// The item is marked scanned on every path except an invalid id.
    pub fn scan_single_item(&self, target: &ScanTarget) -> Result<ItemScanResult, ScanError> {
        let content_id = target.content_id;
        if content_id <= 0 {
            return Err(ScanError::InvalidId(content_id));
        }
        if self.site.posts_index_id == Some(content_id) {
            let err = ScanError::PostsIndex(content_id);
            self.mark(content_id, &err, None)?;
            return Err(err);
        }

        if target.url.trim().is_empty() {
            let err = ScanError::NoUrl(content_id);
            self.mark(content_id, &err, None)?;
            return Err(err);
        }

        let privileged = self.crawler.auth_cookie.is_some();
        let page = match self.fetch_content(&target.url, privileged) {
            Ok(page) => page,
            Err(e) => {
                warn!(content_id, url = %target.url, error = %e, "Fetch failed");
                let err = ScanError::Fetch(e);
                self.mark(content_id, &err, None)?;
                return Err(err);
            }
        };

        let code = Some(page.code);
        let rejection = if page.code >= 400 {
            Some(ScanError::HttpStatus(page.code))
        } else if page.is_problematic_redirect {
            Some(ScanError::ProblematicRedirect {
                original: target.url.clone(),
                final_url: page.final_url.clone(),
                code: page.code,
            })
        } else if !self.site.aggregate_marker.is_empty()
            && page.body.contains(&self.site.aggregate_marker)
        {
            Some(ScanError::AggregateView { code: page.code })
        } else {
            None
        };
        if let Some(err) = rejection {
            self.mark(content_id, &err, code)?;
            return Err(err);
        }

        let (head, body) = match self.record_page(content_id, &page) {
            Ok(counts) => counts,
            Err(e) => {
                warn!(content_id, error = %e, "Recording page assets failed");
                let err = ScanError::Store(e);
                self.mark(content_id, &err, code)?;
                return Err(err);
            }
        };

        debug!(content_id, head = head.total, body = body.total, "Scanned page");
        Ok(ItemScanResult {
            content_id,
            url: target.url.clone(),
            status: ScanStatus::Confirmed,
            http_code: code,
            head,
            body,
            error: None,
        })
    }

    /// Extract head and body assets, store them and mark the item confirmed.
    fn record_page(
        &self,
        content_id: i64,
        page: &FetchedPage,
    ) -> anyhow::Result<(BulkUpsertCounts, BulkUpsertCounts)> {
        let resolver = Resolver::new(self.host, &self.site.origin);
        let (head_html, body_html) = split_head_body(&page.body);
        let head_ids = self.chain.extract_asset_ids(head_html, &resolver)?;
        let body_ids: Vec<i64> = self
            .chain
            .extract_asset_ids(body_html, &resolver)?
            .into_iter()
            .filter(|id| !head_ids.contains(id))
            .collect();

        let now = unix_now();
        let head = self
            .db
            .bulk_upsert_for_content(content_id, &head_ids, Position::Head, now)?;
        let body = self
            .db
            .bulk_upsert_for_content(content_id, &body_ids, Position::Body, now)?;
        self.db
            .mark_scanned(content_id, ScanStatus::Confirmed, Some(page.code), None, now)?;
        Ok((head, body))
    }

    fn mark(&self, content_id: i64, err: &ScanError, code: Option<u16>) -> Result<(), ScanError> {
        self.db
            .mark_scanned(content_id, err.status(), code, Some(&err.to_string()), unix_now())?;
        Ok(())
    }

    /// Scan `targets` in order. Stops before the next target once `cancel` is set.
    pub fn scan_multiple_items(
        &self,
        targets: &[ScanTarget],
        cancel: Option<&AtomicBool>,
        progress_tx: Option<mpsc::Sender<CrawlProgress>>,
    ) -> Vec<ItemScanResult> {
        let total = targets.len();
        if let Some(ref tx) = progress_tx {
            let _ = tx.send(CrawlProgress::Started { total });
        }

        let mut results = Vec::with_capacity(total);
        for (index, target) in targets.iter().enumerate() {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                info!(processed = results.len(), total, "Crawl cancelled");
                if let Some(ref tx) = progress_tx {
                    let _ = tx.send(CrawlProgress::Cancelled {
                        processed: results.len(),
                    });
                }
                return results;
            }
            if let Some(ref tx) = progress_tx {
                let _ = tx.send(CrawlProgress::Scanning {
                    current: index + 1,
                    total,
                    url: target.url.clone(),
                });
            }

            let result = match self.scan_single_item(target) {
                Ok(result) => result,
                Err(e) => ItemScanResult::failed(target, &e),
            };
            results.push(result);
        }

        if let Some(ref tx) = progress_tx {
            let (confirmed, failed, skipped) = tally(&results);
            let _ = tx.send(CrawlProgress::Completed {
                confirmed,
                failed,
                skipped,
            });
        }
        results
    }

    /// Load one page of targets and scan them.
    pub fn run_batch(
        &self,
        mode: TargetMode,
        offset: usize,
        limit: usize,
        cancel: Option<&AtomicBool>,
        progress_tx: Option<mpsc::Sender<CrawlProgress>>,
    ) -> anyhow::Result<BatchSummary> {
        let stale_before = unix_now() - self.crawler.rescan_after_secs;
        let targets = self.db.get_unscanned_targets(mode, offset, limit, stale_before)?;
        let results = self.scan_multiple_items(&targets, cancel, progress_tx);
        let (confirmed, failed, skipped) = tally(&results);

        // Unindexed targets drop out of the list once scanned, so that mode
        // always restarts from the same offset.
        let next_offset = if targets.len() < limit || results.len() < targets.len() {
            None
        } else {
            match mode {
                TargetMode::All => Some(offset + targets.len()),
                TargetMode::Unindexed => Some(offset),
            }
        };

        info!(
            mode = mode.as_str(),
            offset,
            targets = targets.len(),
            confirmed,
            failed,
            skipped,
            "Crawl batch finished"
        );
        Ok(BatchSummary {
            targets: targets.len(),
            confirmed,
            failed,
            skipped,
            next_offset,
            results,
        })
    }
}

fn tally(results: &[ItemScanResult]) -> (usize, usize, usize) {
    results.iter().fold((0, 0, 0), |(c, f, s), r| match r.status {
        ScanStatus::Confirmed => (c + 1, f, s),
        ScanStatus::Failed => (c, f + 1, s),
        ScanStatus::Skipped => (c, f, s + 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, UsageConfirmation};
    use crate::host::{Asset, ContentItem, ContentState};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves canned pages keyed by request URL and records what was asked.
    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<String, RawResponse>,
        requests: RefCell<Vec<(String, Vec<(String, String)>)>>,
    }

    impl FakeFetcher {
        fn page(mut self, url: &str, status: u16, final_url: &str, body: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                RawResponse {
                    status,
                    final_url: final_url.to_string(),
                    body: body.to_string(),
                },
            );
            self
        }
    }

    impl PageFetcher for &FakeFetcher {
        fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse, FetchError> {
            self.requests.borrow_mut().push((
                url.to_string(),
                headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
            // Cache-busted requests are looked up by their base URL.
            let key = url.split("?assetusage-nocache").next().unwrap_or(url);
            self.pages.get(key).cloned().ok_or_else(|| FetchError::Transport {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    const PAGE: &str = r#"<html><head><link rel="icon" href="x">
        <meta property="og:image"><img src="/uploads/logo.png"></head>
        <body><img src="/uploads/logo.png"><img class="wp-image-5"></body></html>"#;

    fn config() -> Config {
        let mut config = Config::default();
        config.site.origin = "https://example.org".to_string();
        config
    }

    fn seeded() -> Database {
        let db = test_db();
        for (id, name) in [(5, "five.jpg"), (6, "logo.png")] {
            db.put_asset(&Asset {
                id,
                url: format!("https://example.org/uploads/{}", name),
                mime_type: "image/jpeg".to_string(),
                title: None,
            })
            .unwrap();
        }
        for id in 1..=3 {
            db.put_content_item(&ContentItem {
                id,
                title: format!("Item {}", id),
                body: String::new(),
                url: Some(format!("https://example.org/?p={}", id)),
                state: ContentState::Published,
                representative_asset_id: None,
            })
            .unwrap();
        }
        db
    }

    fn target(id: i64) -> ScanTarget {
        ScanTarget {
            content_id: id,
            url: format!("https://example.org/?p={}", id),
        }
    }

    #[test]
    fn test_scan_records_head_and_body_rows() {
        let db = seeded();
        let fetcher = FakeFetcher::default().page(
            "https://example.org/?p=1",
            200,
            "https://example.org/?p=1",
            PAGE,
        );
        let crawler = Crawler::new(&db, &db, &fetcher, &config());

        let result = crawler.scan_single_item(&target(1)).unwrap();
        assert_eq!(result.status, ScanStatus::Confirmed);
        assert_eq!(result.head.added, 1);
        assert_eq!(result.body.added, 1);

        let rows = db.get_associations_for_content(1).unwrap();
        let logo = rows.iter().find(|r| r.asset_id == 6).unwrap();
        assert_eq!(logo.position, Position::Head);
        let five = rows.iter().find(|r| r.asset_id == 5).unwrap();
        assert_eq!(five.position, Position::Body);
        assert_eq!(db.usage_confirmation(1).unwrap(), UsageConfirmation::Confirmed);

        let requests = fetcher.requests.borrow();
        assert!(requests[0].1.iter().any(|(k, _)| k == "Cache-Control"));
    }

    #[test]
    fn test_social_card_and_icon_become_head_rows() {
        let db = seeded();
        let fetcher = FakeFetcher::default().page(
            "https://example.org/?p=1",
            200,
            "https://example.org/?p=1",
            r#"<!doctype html><html><head>
                <meta charset="utf-8"><title>Item 1</title>
                <meta property="og:image" content="https://example.org/uploads/logo.png">
                <link rel="icon" href="/uploads/logo.png" sizes="32x32">
                </head><body><p>No images here.</p></body></html>"#,
        );
        let crawler = Crawler::new(&db, &db, &fetcher, &config());

        let result = crawler.scan_single_item(&target(1)).unwrap();
        assert_eq!(result.head.added, 1);
        assert_eq!(result.body.total, 0);

        let rows = db.get_associations_for_content(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asset_id, 6);
        assert_eq!(rows[0].position, Position::Head);
    }

    /// Delegates to the mirror but cannot resolve asset URLs.
    struct BrokenLookups<'a>(&'a Database);

    impl ContentHost for BrokenLookups<'_> {
        fn content_item(&self, id: i64) -> anyhow::Result<Option<ContentItem>> {
            self.0.content_item(id)
        }

        fn asset(&self, id: i64) -> anyhow::Result<Option<Asset>> {
            self.0.asset(id)
        }

        fn resolve_asset_by_url(&self, _url: &str) -> anyhow::Result<Option<i64>> {
            anyhow::bail!("asset lookup unavailable")
        }

        fn resolve_content_by_url(&self, url: &str) -> anyhow::Result<Option<i64>> {
            self.0.resolve_content_by_url(url)
        }
    }

    #[test]
    fn test_store_failure_still_marks_scanned() {
        let db = seeded();
        let host = BrokenLookups(&db);
        let fetcher = FakeFetcher::default().page(
            "https://example.org/?p=1",
            200,
            "https://example.org/?p=1",
            PAGE,
        );
        let crawler = Crawler::new(&db, &host, &fetcher, &config());

        let err = crawler.scan_single_item(&target(1)).unwrap_err();
        assert!(matches!(err, ScanError::Store(_)));
        assert_eq!(db.count_associations().unwrap(), 0);

        let record = db.get_scan_record(1).unwrap().unwrap();
        assert_eq!(record.status, ScanStatus::Failed);
        assert_eq!(record.http_code, Some(200));

        // Marked, so the unindexed list moves on.
        let rerun = crawler.run_batch(TargetMode::Unindexed, 0, 10, None, None).unwrap();
        assert!(rerun.results.iter().all(|r| r.content_id != 1));
    }

    #[test]
    fn test_transport_failure_marks_scanned_and_batch_continues() {
        let db = seeded();
        let fetcher = FakeFetcher::default().page(
            "https://example.org/?p=2",
            200,
            "https://example.org/?p=2",
            PAGE,
        );
        let crawler = Crawler::new(&db, &db, &fetcher, &config());

        let results = crawler.scan_multiple_items(&[target(1), target(2)], None, None);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ScanStatus::Failed);
        assert!(results[0].error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(results[1].status, ScanStatus::Confirmed);

        let record = db.get_scan_record(1).unwrap().unwrap();
        assert_eq!(record.status, ScanStatus::Failed);
        assert_eq!(db.usage_confirmation(1).unwrap(), UsageConfirmation::NotYetConfirmed);
    }

    #[test]
    fn test_problematic_redirect_records_nothing() {
        let db = seeded();
        let fetcher = FakeFetcher::default().page(
            "https://example.org/?p=1",
            200,
            "https://example.org/?p=2",
            PAGE,
        );
        let crawler = Crawler::new(&db, &db, &fetcher, &config());

        let err = crawler.scan_single_item(&target(1)).unwrap_err();
        assert!(matches!(err, ScanError::ProblematicRedirect { code: 200, .. }));
        assert_eq!(db.count_associations().unwrap(), 0);
        assert_eq!(db.get_scan_record(1).unwrap().unwrap().status, ScanStatus::Skipped);
    }

    #[test]
    fn test_skipped_results_keep_http_code() {
        let db = seeded();
        let fetcher = FakeFetcher::default()
            .page("https://example.org/?p=1", 200, "https://example.org/?p=2", PAGE)
            .page(
                "https://example.org/?p=3",
                203,
                "https://example.org/?p=3",
                r#"<div class="attachment-listing">all uploads</div>"#,
            );
        let mut config = config();
        config.site.aggregate_marker = "attachment-listing".to_string();
        let crawler = Crawler::new(&db, &db, &fetcher, &config);

        let results = crawler.scan_multiple_items(&[target(1), target(3)], None, None);
        assert_eq!(results[0].status, ScanStatus::Skipped);
        assert_eq!(results[0].http_code, Some(200));
        assert_eq!(results[1].status, ScanStatus::Skipped);
        assert_eq!(results[1].http_code, Some(203));
        assert_eq!(db.get_scan_record(3).unwrap().unwrap().http_code, Some(203));
    }

    #[test]
    fn test_http_error_and_posts_index() {
        let db = seeded();
        let fetcher = FakeFetcher::default().page(
            "https://example.org/?p=1",
            404,
            "https://example.org/?p=1",
            "not found",
        );
        let mut config = config();
        config.site.posts_index_id = Some(2);
        let crawler = Crawler::new(&db, &db, &fetcher, &config);

        let err = crawler.scan_single_item(&target(1)).unwrap_err();
        assert!(matches!(err, ScanError::HttpStatus(404)));
        assert_eq!(db.get_scan_record(1).unwrap().unwrap().http_code, Some(404));

        let err = crawler.scan_single_item(&target(2)).unwrap_err();
        assert!(matches!(err, ScanError::PostsIndex(2)));
        assert!(fetcher.requests.borrow().iter().all(|(url, _)| !url.contains("p=2")));

        let err = crawler.scan_single_item(&target(0)).unwrap_err();
        assert!(matches!(err, ScanError::InvalidId(0)));
        assert!(db.get_scan_record(0).unwrap().is_none());
    }

    #[test]
    fn test_origin_and_privilege_rules() {
        let db = seeded();
        let fetcher = FakeFetcher::default();
        let mut config = config();
        config.crawler.auth_cookie = Some("session=abc".to_string());
        let crawler = Crawler::new(&db, &db, &fetcher, &config);

        assert!(matches!(
            crawler.fetch_content("https://elsewhere.net/", false),
            Err(FetchError::OutsideOrigin(_))
        ));
        assert!(matches!(
            crawler.fetch_content("http://example.org/?p=1", true),
            Err(FetchError::CrossOriginPrivileged(_))
        ));
        assert!(matches!(
            crawler.fetch_content("ftp://example.org/", false),
            Err(FetchError::InvalidUrl(_))
        ));
        assert!(fetcher.requests.borrow().is_empty());
    }

    #[test]
    fn test_index_any_url_busts_cache_without_headers() {
        let db = seeded();
        let fetcher = FakeFetcher::default().page(
            "https://elsewhere.net/page",
            200,
            "https://elsewhere.net/page",
            "<p>nothing</p>",
        );
        let mut config = config();
        config.crawler.index_any_url = true;
        let crawler = Crawler::new(&db, &db, &fetcher, &config);

        let page = crawler.fetch_content("https://elsewhere.net/page", false).unwrap();
        assert_eq!(page.code, 200);
        assert!(!page.is_problematic_redirect);

        let requests = fetcher.requests.borrow();
        assert!(requests[0].0.contains(CACHE_BUST_PARAM));
        assert!(requests[0].1.is_empty());
    }

    #[test]
    fn test_cancel_stops_before_next_target() {
        let db = seeded();
        let fetcher = FakeFetcher::default();
        let crawler = Crawler::new(&db, &db, &fetcher, &config());
        let cancel = AtomicBool::new(true);
        let (tx, rx) = mpsc::channel();

        let results = crawler.scan_multiple_items(&[target(1), target(2)], Some(&cancel), Some(tx));
        assert!(results.is_empty());
        assert!(fetcher.requests.borrow().is_empty());

        let events: Vec<CrawlProgress> = rx.try_iter().collect();
        assert!(matches!(events.last(), Some(CrawlProgress::Cancelled { processed: 0 })));
    }

    #[test]
    fn test_empty_batch() {
        let db = test_db();
        let fetcher = FakeFetcher::default();
        let crawler = Crawler::new(&db, &db, &fetcher, &config());
        assert!(crawler.scan_multiple_items(&[], None, None).is_empty());

        let summary = crawler.run_batch(TargetMode::All, 0, 10, None, None).unwrap();
        assert_eq!(summary.targets, 0);
        assert_eq!(summary.next_offset, None);
    }

    #[test]
    fn test_run_batch_pages_through_all() {
        let db = seeded();
        let mut fetcher = FakeFetcher::default();
        for id in 1..=3 {
            let url = format!("https://example.org/?p={}", id);
            fetcher = fetcher.page(&url, 200, &url, "<p>plain</p>");
        }
        let crawler = Crawler::new(&db, &db, &fetcher, &config());

        let first = crawler.run_batch(TargetMode::All, 0, 2, None, None).unwrap();
        assert_eq!(first.confirmed, 2);
        assert_eq!(first.next_offset, Some(2));

        let second = crawler.run_batch(TargetMode::All, 2, 2, None, None).unwrap();
        assert_eq!(second.confirmed, 1);
        assert_eq!(second.next_offset, None);

        let rerun = crawler.run_batch(TargetMode::Unindexed, 0, 10, None, None).unwrap();
        assert_eq!(rerun.targets, 0);
    }
}
