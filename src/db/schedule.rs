//! Scheduled maintenance jobs shared between the CLI and the daemon.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::Database;

/// ISO format used for every schedule timestamp, compared as text.
pub const SCHEDULE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Type of scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledTaskType {
    /// Crawl a batch of content items; target is the crawl mode.
    Crawl,
    /// Drop association rows older than the configured window.
    Evict,
    /// Remove rows pointing at deleted items/assets or invalid positions.
    OrphanCleanup,
    /// Refresh the deep-search bundle; target is the asset id.
    DeepSearch,
}

impl ScheduledTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledTaskType::Crawl => "Crawl",
            ScheduledTaskType::Evict => "Evict",
            ScheduledTaskType::OrphanCleanup => "OrphanCleanup",
            ScheduledTaskType::DeepSearch => "DeepSearch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Crawl" => Some(ScheduledTaskType::Crawl),
            "Evict" => Some(ScheduledTaskType::Evict),
            "OrphanCleanup" => Some(ScheduledTaskType::OrphanCleanup),
            "DeepSearch" => Some(ScheduledTaskType::DeepSearch),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ScheduledTaskType::Crawl => "Content Crawl",
            ScheduledTaskType::Evict => "Stale Row Eviction",
            ScheduledTaskType::OrphanCleanup => "Orphan Cleanup",
            ScheduledTaskType::DeepSearch => "Deep Search",
        }
    }
}

/// Status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Running => "running",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
            ScheduleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScheduleStatus::Pending),
            "running" => Some(ScheduleStatus::Running),
            "completed" => Some(ScheduleStatus::Completed),
            "cancelled" => Some(ScheduleStatus::Cancelled),
            "failed" => Some(ScheduleStatus::Failed),
            _ => None,
        }
    }
}

/// A scheduled task record.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: i64,
    pub task_type: ScheduledTaskType,
    pub target: String,
    pub scheduled_at: String,
    pub hours_start: Option<u8>,
    pub hours_end: Option<u8>,
    pub status: ScheduleStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

const TASK_COLUMNS: &str = "id, task_type, target, scheduled_at, hours_start, hours_end, \
                            status, created_at, started_at, completed_at, error_message";

fn row_to_scheduled_task(row: &rusqlite::Row) -> rusqlite::Result<ScheduledTask> {
    let task_type_str: String = row.get(1)?;
    let task_type = ScheduledTaskType::parse(&task_type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown task type '{}'", task_type_str).into(),
        )
    })?;
    let status_str: String = row.get(6)?;
    let status = ScheduleStatus::parse(&status_str).unwrap_or(ScheduleStatus::Pending);
    Ok(ScheduledTask {
        id: row.get(0)?,
        task_type,
        target: row.get(2)?,
        scheduled_at: row.get(3)?,
        hours_start: row.get(4)?,
        hours_end: row.get(5)?,
        status,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
        error_message: row.get(10)?,
    })
}

fn now_string() -> String {
    chrono::Utc::now().format(SCHEDULE_TIME_FORMAT).to_string()
}

impl Database {
    pub fn create_scheduled_task(
        &self,
        task_type: ScheduledTaskType,
        target: &str,
        scheduled_at: &str,
        hours_start: Option<u8>,
        hours_end: Option<u8>,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO scheduled_tasks (
                task_type, target, scheduled_at, hours_start, hours_end, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                task_type.as_str(),
                target,
                scheduled_at,
                hours_start,
                hours_end,
                now_string(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn query_tasks<P: rusqlite::Params>(&self, filter: &str, params: P) -> Result<Vec<ScheduledTask>> {
        let sql = format!("SELECT {} FROM scheduled_tasks {}", TASK_COLUMNS, filter);
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params, row_to_scheduled_task)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    pub fn get_scheduled_task(&self, id: i64) -> Result<Option<ScheduledTask>> {
        Ok(self.query_tasks("WHERE id = ?", [id])?.into_iter().next())
    }

    pub fn get_pending_schedules(&self) -> Result<Vec<ScheduledTask>> {
        self.query_tasks("WHERE status = 'pending' ORDER BY scheduled_at ASC", [])
    }

    pub fn get_overdue_schedules(&self, now: &str) -> Result<Vec<ScheduledTask>> {
        self.query_tasks(
            "WHERE status = 'pending' AND scheduled_at < ? ORDER BY scheduled_at ASC",
            [now],
        )
    }

    pub fn get_all_schedules(&self) -> Result<Vec<ScheduledTask>> {
        self.query_tasks("ORDER BY scheduled_at DESC LIMIT 100", [])
    }

    /// Pending tasks whose time has come, oldest first.
    pub fn get_due_pending_tasks(&self, now: &str, limit: usize) -> Result<Vec<ScheduledTask>> {
        self.query_tasks(
            "WHERE status = 'pending' AND scheduled_at <= ? ORDER BY scheduled_at ASC LIMIT ?",
            rusqlite::params![now, limit as i64],
        )
    }

    pub fn update_schedule_status(
        &self,
        id: i64,
        status: ScheduleStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = now_string();
        match status {
            ScheduleStatus::Running => {
                self.conn.execute(
                    "UPDATE scheduled_tasks SET status = ?, started_at = ? WHERE id = ?",
                    rusqlite::params![status.as_str(), now, id],
                )?;
            }
            ScheduleStatus::Completed | ScheduleStatus::Failed | ScheduleStatus::Cancelled => {
                self.conn.execute(
                    "UPDATE scheduled_tasks SET status = ?, completed_at = ?, error_message = ? WHERE id = ?",
                    rusqlite::params![status.as_str(), now, error_message, id],
                )?;
            }
            ScheduleStatus::Pending => {
                self.conn.execute(
                    "UPDATE scheduled_tasks SET status = ? WHERE id = ?",
                    rusqlite::params![status.as_str(), id],
                )?;
            }
        }
        Ok(())
    }

    /// Cancel a task that has not started yet. Returns false otherwise.
    pub fn cancel_schedule(&self, id: i64) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE scheduled_tasks SET status = 'cancelled', completed_at = ? WHERE id = ? AND status = 'pending'",
            rusqlite::params![now_string(), id],
        )?;
        Ok(n > 0)
    }
}
