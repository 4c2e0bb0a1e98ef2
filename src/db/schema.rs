pub const SCHEMA: &str = r#"
-- Host mirror: content items as published by the content-management host
CREATE TABLE IF NOT EXISTS content_items (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT '',
    url TEXT,
    state TEXT NOT NULL DEFAULT 'published',   -- draft/published/deleted
    representative_asset_id INTEGER,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_content_items_url ON content_items(url);
CREATE INDEX IF NOT EXISTS idx_content_items_state ON content_items(state);

-- Host mirror: media assets
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    title TEXT
);

CREATE INDEX IF NOT EXISTS idx_assets_url ON assets(url);

-- Host mirror: auxiliary storage searched by the deep search
CREATE TABLE IF NOT EXISTS content_meta (
    content_id INTEGER NOT NULL,
    meta_key TEXT NOT NULL,
    meta_value TEXT NOT NULL,
    PRIMARY KEY (content_id, meta_key)
);

CREATE TABLE IF NOT EXISTS site_options (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_meta (
    user_id INTEGER NOT NULL,
    meta_key TEXT NOT NULL,
    meta_value TEXT NOT NULL,
    PRIMARY KEY (user_id, meta_key)
);

-- Association index: one row per (content item, asset)
CREATE TABLE IF NOT EXISTS associations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_id INTEGER NOT NULL,
    asset_id INTEGER NOT NULL,
    position TEXT NOT NULL,           -- content/thumbnail/head/body
    last_checked INTEGER NOT NULL,    -- unix seconds
    UNIQUE (content_id, asset_id)
);

CREATE INDEX IF NOT EXISTS idx_associations_asset ON associations(asset_id, position);
CREATE INDEX IF NOT EXISTS idx_associations_last_checked ON associations(last_checked);

-- Per-item snapshot of the assets found in the stored body (JSON array)
CREATE TABLE IF NOT EXISTS content_snapshots (
    content_id INTEGER PRIMARY KEY,
    entries TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Diff baseline written just before an item is saved, consumed by the next sync
CREATE TABLE IF NOT EXISTS content_snapshots_pre_update (
    content_id INTEGER PRIMARY KEY,
    entries TEXT NOT NULL,
    saved_at INTEGER NOT NULL
);

-- Inverse snapshot: content items per asset
CREATE TABLE IF NOT EXISTS asset_snapshots (
    asset_id INTEGER NOT NULL,
    content_id INTEGER NOT NULL,
    added_at INTEGER NOT NULL,
    PRIMARY KEY (asset_id, content_id)
);

CREATE INDEX IF NOT EXISTS idx_asset_snapshots_content ON asset_snapshots(content_id);

-- Crawler bookkeeping: last scan per content item (even failed ones)
CREATE TABLE IF NOT EXISTS content_scans (
    content_id INTEGER PRIMARY KEY,
    scanned_at INTEGER NOT NULL,
    status TEXT NOT NULL,             -- confirmed/failed/skipped
    http_code INTEGER,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_content_scans_scanned_at ON content_scans(scanned_at);

-- Cached deep-search result bundles (JSON)
CREATE TABLE IF NOT EXISTS deep_search_cache (
    asset_id INTEGER PRIMARY KEY,
    bundle TEXT NOT NULL,
    searched_at INTEGER NOT NULL
);

-- Scheduled tasks for the daemon
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_type TEXT NOT NULL,           -- 'Crawl', 'Evict', 'OrphanCleanup', 'DeepSearch'
    target TEXT NOT NULL,              -- crawl mode, or asset id for deep search
    scheduled_at TEXT NOT NULL,        -- ISO timestamp when task should run
    hours_start INTEGER,               -- Optional hour of day to start (0-23)
    hours_end INTEGER,                 -- Optional hour of day to end (0-23)
    status TEXT DEFAULT 'pending',     -- pending/running/completed/cancelled/failed
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_status ON scheduled_tasks(status);
CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_scheduled_at ON scheduled_tasks(scheduled_at);
"#;

/// Additive migrations for databases created by earlier versions.
/// Failures (column already exists) are ignored.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE content_scans ADD COLUMN http_code INTEGER",
    "ALTER TABLE assets ADD COLUMN title TEXT",
];
