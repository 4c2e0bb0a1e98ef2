//! Schedule manager and the maintenance jobs it runs.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, Timelike, Utc};
use std::time::Instant;
use tracing::{info, warn};

use crate::config::Config;
use crate::crawler::Crawler;
use crate::db::{
    unix_now, Database, ScheduleStatus, ScheduledTask, ScheduledTaskType, TargetMode,
    SCHEDULE_TIME_FORMAT,
};
use crate::deep_search;

/// Manages the polling of scheduled tasks.
pub struct ScheduleManager {
    /// Last time we checked for due schedules.
    last_check: Option<Instant>,
    /// Minimum interval between checks.
    check_interval_ms: u64,
    /// Upper bound on tasks returned per poll.
    batch_limit: usize,
}

impl ScheduleManager {
    pub fn new() -> Self {
        Self {
            last_check: None,
            check_interval_ms: 1000,
            batch_limit: 10,
        }
    }

    /// Tasks that are due and inside their hours of operation.
    pub fn poll_schedules(&mut self, db: &Database) -> Vec<ScheduledTask> {
        if let Some(last) = self.last_check {
            if last.elapsed().as_millis() < self.check_interval_ms as u128 {
                return Vec::new();
            }
        }
        self.last_check = Some(Instant::now());

        let now_str = Utc::now().format(SCHEDULE_TIME_FORMAT).to_string();
        let current_hour = Local::now().hour() as u8;

        let due = match db.get_due_pending_tasks(&now_str, self.batch_limit) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Failed to load due schedules: {}", e);
                return Vec::new();
            }
        };

        due.into_iter()
            .filter(|task| within_hours(current_hour, task.hours_start, task.hours_end))
            .collect()
    }

    /// Pending tasks whose time has already passed.
    pub fn check_overdue(&self, db: &Database) -> Vec<ScheduledTask> {
        let now = Utc::now().format(SCHEDULE_TIME_FORMAT).to_string();
        db.get_overdue_schedules(&now).unwrap_or_default()
    }
}

impl Default for ScheduleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `hour` falls in `[start, end)`. Ranges with `start > end` wrap
/// past midnight. Without both bounds every hour qualifies.
pub fn within_hours(hour: u8, start: Option<u8>, end: Option<u8>) -> bool {
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) => (s, e),
        _ => return true,
    };

    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

pub fn mark_task_running(task: &ScheduledTask, db: &Database) -> Result<()> {
    db.update_schedule_status(task.id, ScheduleStatus::Running, None)
        .with_context(|| format!("Failed to mark task {} running", task.id))
}

pub fn mark_task_completed(task_id: i64, db: &Database) -> Result<()> {
    db.update_schedule_status(task_id, ScheduleStatus::Completed, None)
        .with_context(|| format!("Failed to mark task {} completed", task_id))
}

pub fn mark_task_failed(task_id: i64, db: &Database, error: &str) -> Result<()> {
    db.update_schedule_status(task_id, ScheduleStatus::Failed, Some(error))
        .with_context(|| format!("Failed to mark task {} failed", task_id))
}

/// Run one task to completion. Returns a one-line summary.
pub fn execute_task(db: &Database, config: &Config, task: &ScheduledTask) -> Result<String> {
    info!(
        task_id = task.id,
        task_type = task.task_type.as_str(),
        target = %task.target,
        "Executing scheduled task"
    );

    match task.task_type {
        ScheduledTaskType::Crawl => {
            let mode = if task.target.is_empty() {
                TargetMode::Unindexed
            } else {
                TargetMode::parse(&task.target)
                    .ok_or_else(|| anyhow!("Unknown crawl mode '{}'", task.target))?
            };
            run_crawl(db, config, mode)
        }
        ScheduledTaskType::Evict => {
            let cutoff = unix_now() - config.index.max_age_secs;
            let deleted =
                db.delete_not_updated_since(cutoff, config.index.eviction_safety_margin_secs)?;
            Ok(format!("Evicted {} stale association(s)", deleted))
        }
        ScheduledTaskType::OrphanCleanup => {
            let orphaned = db.delete_orphaned()?;
            let invalid = db.delete_invalid()?;
            Ok(format!(
                "Removed {} orphaned and {} invalid association(s)",
                orphaned, invalid
            ))
        }
        ScheduledTaskType::DeepSearch => {
            if task.target.is_empty() || task.target == "all" {
                let searched = deep_search::run_all(db, db)?;
                return Ok(format!("Deep search refreshed for {} asset(s)", searched));
            }
            let asset_id: i64 = task
                .target
                .parse()
                .with_context(|| format!("Invalid asset id '{}'", task.target))?;
            match deep_search::run(db, db, asset_id)? {
                Some(bundle) => Ok(format!(
                    "Deep search for asset {} found {} item(s)",
                    asset_id,
                    bundle.posts.len()
                )),
                None => Err(anyhow!("Asset {} not found", asset_id)),
            }
        }
    }
}

/// Crawl batches until the target list is exhausted.
fn run_crawl(db: &Database, config: &Config, mode: TargetMode) -> Result<String> {
    let crawler = Crawler::with_ureq(db, db, config);
    let mut offset = 0;
    let (mut confirmed, mut failed, mut skipped) = (0, 0, 0);
    let mut previous: Vec<i64> = Vec::new();

    loop {
        let summary = crawler.run_batch(mode, offset, config.crawler.batch_size, None, None)?;
        confirmed += summary.confirmed;
        failed += summary.failed;
        skipped += summary.skipped;

        // Targets that could not be marked scanned come back at the same offset.
        let ids: Vec<i64> = summary.results.iter().map(|r| r.content_id).collect();
        if !ids.is_empty() && ids == previous {
            warn!(offset, "Crawl made no progress, stopping");
            break;
        }
        previous = ids;

        match summary.next_offset {
            Some(next) => offset = next,
            None => break,
        }
    }

    Ok(format!(
        "Crawl ({}) finished: {} confirmed, {} failed, {} skipped",
        mode.as_str(),
        confirmed,
        failed,
        skipped
    ))
}
