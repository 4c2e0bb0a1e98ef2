//! # assetusage CLI
//!
//! Maintains the host mirror and the association index, and answers
//! "where is this asset used".
//!
//! ```bash
//! assetusage init
//! assetusage content save --id 12 --title "Hello" --body-file hello.html
//! assetusage crawl --mode unindexed
//! assetusage asset usage 5
//! assetusage export usage.html --format html
//! ```

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use assetusage::aggregate::collect_usage;
use assetusage::config::Config;
use assetusage::crawler::{CrawlProgress, Crawler};
use assetusage::deep_search;
use assetusage::db::{
    unix_now, Database, IndexScope, ScheduledTaskType, TargetMode, SCHEDULE_TIME_FORMAT,
};
use assetusage::export::{export_usage, ExportFormat};
use assetusage::host::{Asset, ContentItem, ContentState};
use assetusage::logging;
use assetusage::schedule::ScheduleManager;
use assetusage::sync::{RenderContext, Synchronizer};

#[derive(Parser)]
#[command(name = "assetusage", version, about = "Track where media assets are used")]
struct Cli {
    /// Path to config file. Falls back to ASSETUSAGE_CONFIG, then the platform config dir.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and run migrations.
    Init,

    /// Manage mirrored content items.
    Content {
        #[command(subcommand)]
        action: ContentAction,
    },

    /// Manage mirrored assets.
    Asset {
        #[command(subcommand)]
        action: AssetAction,
    },

    /// Index a content item's stored body.
    Sync {
        id: i64,
        /// Reindex even if a snapshot exists.
        #[arg(long)]
        force: bool,
    },

    /// Crawl rendered pages for one batch of targets.
    Crawl {
        #[arg(long, value_enum, default_value_t = CrawlMode::Unindexed)]
        mode: CrawlMode,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Defaults to crawler.batch_size.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete associations not confirmed recently.
    Evict {
        /// Defaults to index.max_age_secs.
        #[arg(long)]
        max_age_secs: Option<i64>,
    },

    /// Delete orphaned and invalid associations.
    Cleanup,

    /// Delete every association.
    Clear {
        #[arg(long)]
        yes: bool,
    },

    /// Search stored settings and bodies for an asset.
    DeepSearch { asset_id: i64 },

    /// Write a usage report for all assets.
    Export {
        path: PathBuf,
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,
    },

    /// Manage scheduled maintenance tasks.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ContentAction {
    /// Store an item in the mirror without touching the index.
    Put(ContentArgs),
    /// Store an item and run the save hooks.
    Save(ContentArgs),
    /// Mark an item deleted and drop it from the index.
    Delete { id: i64 },
    Show { id: i64 },
}

#[derive(clap::Args)]
struct ContentArgs {
    #[arg(long)]
    id: i64,
    #[arg(long, default_value = "")]
    title: String,
    #[arg(long)]
    url: Option<String>,
    #[arg(long, value_enum, default_value_t = StateArg::Published)]
    state: StateArg,
    #[arg(long, conflicts_with = "body_file")]
    body: Option<String>,
    #[arg(long)]
    body_file: Option<PathBuf>,
    /// Representative (cover) asset id.
    #[arg(long)]
    representative: Option<i64>,
}

#[derive(Subcommand)]
enum AssetAction {
    Put {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "image/jpeg")]
        mime_type: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Remove an asset and everything indexed for it.
    Delete { id: i64 },
    Show { id: i64 },
    /// Print where the asset is used, as JSON.
    Usage { id: i64 },
}

#[derive(Subcommand)]
enum ScheduleAction {
    Add {
        #[arg(value_enum)]
        task: TaskArg,
        /// Crawl mode, or asset id / "all" for deep search.
        #[arg(long, default_value = "")]
        target: String,
        /// Start after this many minutes.
        #[arg(long, default_value_t = 0)]
        in_minutes: i64,
        #[arg(long)]
        hours_start: Option<u8>,
        #[arg(long)]
        hours_end: Option<u8>,
    },
    List,
    Cancel { id: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum CrawlMode {
    All,
    Unindexed,
}

impl From<CrawlMode> for TargetMode {
    fn from(mode: CrawlMode) -> Self {
        match mode {
            CrawlMode::All => TargetMode::All,
            CrawlMode::Unindexed => TargetMode::Unindexed,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Draft,
    Published,
}

impl From<StateArg> for ContentState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Draft => ContentState::Draft,
            StateArg::Published => ContentState::Published,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Json,
    Csv,
    Html,
}

impl From<ReportFormat> for ExportFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Json => ExportFormat::Json,
            ReportFormat::Csv => ExportFormat::Csv,
            ReportFormat::Html => ExportFormat::Html,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TaskArg {
    Crawl,
    Evict,
    Cleanup,
    DeepSearch,
}

impl From<TaskArg> for ScheduledTaskType {
    fn from(task: TaskArg) -> Self {
        match task {
            TaskArg::Crawl => ScheduledTaskType::Crawl,
            TaskArg::Evict => ScheduledTaskType::Evict,
            TaskArg::Cleanup => ScheduledTaskType::OrphanCleanup,
            TaskArg::DeepSearch => ScheduledTaskType::DeepSearch,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(parent) = config.db_path().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(config.db_path())?;
    db.initialize()?;

    if config.schedule.check_overdue_on_startup && !matches!(cli.command, Commands::Schedule { .. }) {
        let overdue = ScheduleManager::new().check_overdue(&db);
        if !overdue.is_empty() {
            eprintln!(
                "{} scheduled task(s) are overdue; run assetusage-daemon --once to process them",
                overdue.len()
            );
        }
    }

    match cli.command {
        Commands::Init => {
            println!("Database ready at {}", config.db_path().display());
        }
        Commands::Content { action } => run_content(&db, &config, action)?,
        Commands::Asset { action } => run_asset(&db, &config, action)?,
        Commands::Sync { id, force } => {
            let item = db
                .get_content_item(id)?
                .with_context(|| format!("Content item {} not found", id))?;
            let outcome = Synchronizer::new(&db, &db, &config).update_indexes(
                id,
                &item.body,
                RenderContext::FullPage,
                force,
            )?;
            print_json(&outcome)?;
        }
        Commands::Crawl {
            mode,
            offset,
            limit,
        } => {
            let limit = limit.unwrap_or(config.crawler.batch_size);
            let (tx, rx) = mpsc::channel();
            let printer = thread::spawn(move || {
                for event in rx {
                    if let CrawlProgress::Scanning {
                        current,
                        total,
                        url,
                    } = event
                    {
                        eprintln!("[{}/{}] {}", current, total, url);
                    }
                }
            });
            let summary = Crawler::with_ureq(&db, &db, &config).run_batch(
                mode.into(),
                offset,
                limit,
                None,
                Some(tx),
            )?;
            let _ = printer.join();
            print_json(&summary)?;
        }
        Commands::Evict { max_age_secs } => {
            let max_age = max_age_secs.unwrap_or(config.index.max_age_secs);
            let deleted = db.delete_not_updated_since(
                unix_now() - max_age,
                config.index.eviction_safety_margin_secs,
            )?;
            println!("Evicted {} association(s)", deleted);
        }
        Commands::Cleanup => {
            let orphaned = db.delete_orphaned()?;
            let invalid = db.delete_invalid()?;
            println!("Removed {} orphaned and {} invalid association(s)", orphaned, invalid);
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("Refusing to clear the index without --yes");
            }
            db.clear_all()?;
            println!("Index cleared");
        }
        Commands::DeepSearch { asset_id } => match deep_search::run(&db, &db, asset_id)? {
            Some(bundle) => print_json(&bundle)?,
            None => bail!("Asset {} not found", asset_id),
        },
        Commands::Export { path, format } => {
            let format: ExportFormat = match format {
                Some(f) => f.into(),
                None => format_from_extension(&path)?,
            };
            let count = export_usage(&db, &path, format, config.index.global_threshold)?;
            println!(
                "Exported {} asset(s) as {} to {}",
                count,
                format.name(),
                path.display()
            );
        }
        Commands::Schedule { action } => run_schedule(&db, &config, action)?,
    }

    Ok(())
}

fn run_content(db: &Database, config: &Config, action: ContentAction) -> Result<()> {
    let sync = Synchronizer::new(db, db, config);
    match action {
        ContentAction::Put(args) => {
            db.put_content_item(&args.into_item()?)?;
        }
        ContentAction::Save(args) => {
            let item = args.into_item()?;
            sync.on_content_about_to_save(item.id)?;
            db.put_content_item(&item)?;
            print_json(&sync.on_content_changed(item.id)?)?;
        }
        ContentAction::Delete { id } => {
            if !db.set_content_state(id, ContentState::Deleted)? {
                bail!("Content item {} not found", id);
            }
            print_json(&sync.on_content_deleted(id)?)?;
        }
        ContentAction::Show { id } => {
            let item = db
                .get_content_item(id)?
                .with_context(|| format!("Content item {} not found", id))?;

            #[derive(Serialize)]
            struct ContentView<'a> {
                #[serde(flatten)]
                item: &'a ContentItem,
                associations: Vec<assetusage::db::Association>,
                oldest_check: Option<i64>,
                scan: Option<assetusage::db::ScanRecord>,
                usage_confirmation: assetusage::db::UsageConfirmation,
            }

            print_json(&ContentView {
                item: &item,
                associations: db.get_associations_for_content(id)?,
                oldest_check: db.oldest_entry_timestamp(IndexScope::Content(id))?,
                scan: db.get_scan_record(id)?,
                usage_confirmation: db.usage_confirmation(id)?,
            })?;
        }
    }
    Ok(())
}

impl ContentArgs {
    fn into_item(self) -> Result<ContentItem> {
        let body = match (self.body, self.body_file) {
            (Some(body), _) => body,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            (None, None) => String::new(),
        };
        Ok(ContentItem {
            id: self.id,
            title: self.title,
            body,
            url: self.url,
            state: self.state.into(),
            representative_asset_id: self.representative,
        })
    }
}

fn run_asset(db: &Database, config: &Config, action: AssetAction) -> Result<()> {
    match action {
        AssetAction::Put {
            id,
            url,
            mime_type,
            title,
        } => {
            db.put_asset(&Asset {
                id,
                url,
                mime_type,
                title,
            })?;
        }
        AssetAction::Delete { id } => {
            let report = Synchronizer::new(db, db, config).on_asset_deleted(id)?;
            db.remove_asset(id)?;
            print_json(&report)?;
        }
        AssetAction::Show { id } => {
            let asset = db
                .get_asset(id)?
                .with_context(|| format!("Asset {} not found", id))?;

            #[derive(Serialize)]
            struct AssetView<'a> {
                #[serde(flatten)]
                asset: &'a Asset,
                probably_global: bool,
                associations: Vec<assetusage::db::Association>,
            }

            print_json(&AssetView {
                asset: &asset,
                probably_global: db.is_probably_global(id, config.index.global_threshold)?,
                associations: db.get_associations_for_asset(id)?,
            })?;
        }
        AssetAction::Usage { id } => print_json(&collect_usage(db, db, id)?)?,
    }
    Ok(())
}

fn run_schedule(db: &Database, config: &Config, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::Add {
            task,
            target,
            in_minutes,
            hours_start,
            hours_end,
        } => {
            let task_type: ScheduledTaskType = task.into();
            if task_type == ScheduledTaskType::Crawl
                && !target.is_empty()
                && TargetMode::parse(&target).is_none()
            {
                bail!("Crawl target must be 'all' or 'unindexed'");
            }
            let at = (Utc::now() + Duration::minutes(in_minutes))
                .format(SCHEDULE_TIME_FORMAT)
                .to_string();
            let id = db.create_scheduled_task(
                task_type,
                &target,
                &at,
                hours_start.or(config.schedule.default_hours_start),
                hours_end.or(config.schedule.default_hours_end),
            )?;
            println!("Scheduled {} as task {} at {}", task_type.display_name(), id, at);
        }
        ScheduleAction::List => {
            for task in db.get_all_schedules()? {
                let hours = match (task.hours_start, task.hours_end) {
                    (Some(s), Some(e)) => format!(" hours {:02}-{:02}", s, e),
                    _ => String::new(),
                };
                println!(
                    "{:>5}  {:<10}  {:<20}  {}  {}{}{}",
                    task.id,
                    task.status.as_str(),
                    task.task_type.display_name(),
                    task.scheduled_at,
                    task.target,
                    hours,
                    task.error_message
                        .map(|e| format!("  ({})", e))
                        .unwrap_or_default()
                );
            }
        }
        ScheduleAction::Cancel { id } => {
            if !db.cancel_schedule(id)? {
                bail!("Task {} is not pending", id);
            }
            println!("Cancelled task {}", id);
        }
    }
    Ok(())
}

fn format_from_extension(path: &Path) -> Result<ExportFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    ExportFormat::parse(ext)
        .with_context(|| format!("Cannot infer report format from '{}', pass --format", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
