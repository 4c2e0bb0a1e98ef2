//! assetusage daemon for scheduled maintenance.
//!
//! Runs the tasks queued with `assetusage schedule add`: crawls, eviction,
//! orphan cleanup and deep searches. The CLI and the daemon share the SQLite
//! database.
//!
//! ## Usage
//!
//! ```bash
//! assetusage-daemon              # Run in foreground
//! assetusage-daemon --once       # Process due tasks once and exit
//! ```

use anyhow::{Context, Result};
use chrono::{Local, Timelike};
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use assetusage::config::{Config, ScheduleConfig};
use assetusage::db::Database;
use assetusage::logging;
use assetusage::schedule::{
    execute_task, mark_task_completed, mark_task_failed, mark_task_running, within_hours,
    ScheduleManager,
};

#[derive(Parser)]
#[command(
    name = "assetusage-daemon",
    version,
    about = "Background processor for scheduled assetusage tasks"
)]
struct DaemonArgs {
    /// Process due tasks once and exit
    #[arg(long)]
    once: bool,

    /// Poll interval in seconds
    #[arg(long, short = 'i', default_value_t = 60)]
    interval: u64,

    /// Path to config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = DaemonArgs::parse();

    logging::init_daemon()?;

    info!("assetusage daemon starting...");

    let config = load_config(&args)?;
    info!("Config loaded");

    if let Some(parent) = config.db_path().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(config.db_path()).context("Failed to open database")?;
    db.initialize()?;
    info!("Database opened at {:?}", config.db_path());

    let mut manager = ScheduleManager::new();
    if args.once {
        info!("Running in single-shot mode");
        process_pending_tasks(&mut manager, &db, &config)?;
    } else {
        info!("Running in daemon mode, polling every {} seconds", args.interval);
        run_daemon_loop(&mut manager, &db, &config, args.interval);
    }

    info!("assetusage daemon stopped");
    Ok(())
}

fn load_config(args: &DaemonArgs) -> Result<Config> {
    let path = args.config.clone().unwrap_or_else(Config::config_path);

    if path.exists() {
        Config::load_from(&path)
    } else {
        warn!("Config file not found at {:?}, using defaults", path);
        Ok(Config::default())
    }
}

fn run_daemon_loop(manager: &mut ScheduleManager, db: &Database, config: &Config, poll_interval: u64) {
    loop {
        if should_process_now(&config.schedule) {
            if let Err(e) = process_pending_tasks(manager, db, config) {
                error!("Error processing tasks: {:#}", e);
            }
        } else {
            info!("Outside hours of operation, skipping this cycle");
        }

        thread::sleep(Duration::from_secs(poll_interval));
    }
}

/// Daemon-wide hours of operation from the config.
fn should_process_now(schedule: &ScheduleConfig) -> bool {
    within_hours(
        Local::now().hour() as u8,
        schedule.default_hours_start,
        schedule.default_hours_end,
    )
}

fn process_pending_tasks(manager: &mut ScheduleManager, db: &Database, config: &Config) -> Result<()> {
    let tasks = manager.poll_schedules(db);

    if tasks.is_empty() {
        info!("No pending tasks");
        return Ok(());
    }

    info!("Found {} pending task(s)", tasks.len());

    for task in tasks {
        info!("Processing task {} ({})", task.id, task.task_type.display_name());
        mark_task_running(&task, db)?;

        match execute_task(db, config, &task) {
            Ok(summary) => {
                info!("Task {} completed: {}", task.id, summary);
                mark_task_completed(task.id, db)?;
            }
            Err(e) => {
                error!("Task {} failed: {:#}", task.id, e);
                mark_task_failed(task.id, db, &format!("{:#}", e))?;
            }
        }
    }

    Ok(())
}
