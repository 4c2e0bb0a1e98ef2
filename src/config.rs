use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_db_path(),
        }
    }
}

/// The managed corpus as seen from the outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Base URL of the site. Privileged requests are only sent here.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Content item that renders the posts index. Never crawled.
    #[serde(default)]
    pub posts_index_id: Option<i64>,

    /// Marker emitted by "list all assets" views; bodies containing it are not indexed.
    #[serde(default = "default_aggregate_marker")]
    pub aggregate_marker: String,
}

fn default_origin() -> String {
    "http://localhost".to_string()
}

fn default_aggregate_marker() -> String {
    "<!-- assetusage:all-assets -->".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            posts_index_id: None,
            aggregate_marker: default_aggregate_marker(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Only record assets with an `image/*` MIME type.
    #[serde(default = "default_images_only")]
    pub images_only: bool,

    /// An asset seen in head/body positions on more than this many items is "probably global".
    #[serde(default = "default_global_threshold")]
    pub global_threshold: u32,

    /// Rows not confirmed within this window are evicted.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: i64,

    #[serde(default = "default_eviction_safety_margin_secs")]
    pub eviction_safety_margin_secs: i64,
}

fn default_images_only() -> bool {
    true
}

fn default_global_threshold() -> u32 {
    4
}

fn default_max_age_secs() -> i64 {
    30 * 24 * 3600
}

fn default_eviction_safety_margin_secs() -> i64 {
    60
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            images_only: default_images_only(),
            global_threshold: default_global_threshold(),
            max_age_secs: default_max_age_secs(),
            eviction_safety_margin_secs: default_eviction_safety_margin_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Allow fetching URLs outside the origin. Sends no cache headers and
    /// appends a cache-busting parameter instead.
    #[serde(default)]
    pub index_any_url: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Session cookie attached to privileged requests against the origin.
    #[serde(default)]
    pub auth_cookie: Option<String>,

    /// Items scanned longer ago than this count as unindexed again.
    #[serde(default = "default_rescan_after_secs")]
    pub rescan_after_secs: i64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_redirects() -> u32 {
    5
}

fn default_user_agent() -> String {
    format!("assetusage-crawler/{}", env!("CARGO_PKG_VERSION"))
}

fn default_batch_size() -> usize {
    20
}

fn default_rescan_after_secs() -> i64 {
    7 * 24 * 3600
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            index_any_url: false,
            batch_size: default_batch_size(),
            auth_cookie: None,
            rescan_after_secs: default_rescan_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Whether to report overdue schedules on startup.
    #[serde(default = "default_check_overdue_on_startup")]
    pub check_overdue_on_startup: bool,

    /// Default start hour for hours of operation (0-23).
    #[serde(default)]
    pub default_hours_start: Option<u8>,

    /// Default end hour for hours of operation (0-23).
    #[serde(default)]
    pub default_hours_end: Option<u8>,
}

fn default_check_overdue_on_startup() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_overdue_on_startup: default_check_overdue_on_startup(),
            default_hours_start: None,
            default_hours_end: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("assetusage")
        .join("assetusage.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            site: SiteConfig::default(),
            index: IndexConfig::default(),
            crawler: CrawlerConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing defaults if the file is missing.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.crawler.timeout_secs == 0 {
            bail!("crawler.timeout_secs must be > 0");
        }
        if self.crawler.batch_size == 0 {
            bail!("crawler.batch_size must be > 0");
        }
        match url::Url::parse(&self.site.origin) {
            Ok(origin) if matches!(origin.scheme(), "http" | "https") => {}
            Ok(origin) => bail!("site.origin must be http or https, got '{}'", origin.scheme()),
            Err(e) => bail!("site.origin is not a valid URL: {}", e),
        }
        for hour in [self.schedule.default_hours_start, self.schedule.default_hours_end]
            .into_iter()
            .flatten()
        {
            if hour > 23 {
                bail!("schedule hours must be in 0-23, got {}", hour);
            }
        }
        Ok(())
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.database.sqlite_path
    }

    /// `ASSETUSAGE_CONFIG` wins over the platform config directory.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("ASSETUSAGE_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("assetusage")
    }
}
