//! Crawler bookkeeping: when each content item was last fetched and how it went.

use anyhow::Result;
use serde::Serialize;

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Fetched and its assets recorded.
    Confirmed,
    /// Fetch or validation failed.
    Failed,
    /// Fetched but deliberately not recorded (problematic redirect, aggregate page).
    Skipped,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Confirmed => "confirmed",
            ScanStatus::Failed => "failed",
            ScanStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(ScanStatus::Confirmed),
            "failed" => Some(ScanStatus::Failed),
            "skipped" => Some(ScanStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRecord {
    pub content_id: i64,
    pub scanned_at: i64,
    pub status: ScanStatus,
    pub http_code: Option<u16>,
    pub error_message: Option<String>,
}

/// What a caller may say about an item's rendered-page usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageConfirmation {
    /// A successful fetch backs the recorded rows (possibly none).
    Confirmed,
    /// Never fetched, or the last fetch failed or was skipped.
    NotYetConfirmed,
}

/// Which content items a crawl batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Every published item with a URL.
    All,
    /// Published items never scanned, or last scanned before the rescan window.
    Unindexed,
}

impl TargetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetMode::All => "all",
            TargetMode::Unindexed => "unindexed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(TargetMode::All),
            "unindexed" => Some(TargetMode::Unindexed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanTarget {
    pub content_id: i64,
    pub url: String,
}

impl Database {
    /// Record a scan attempt. Called for every attempt, failed ones included.
    pub fn mark_scanned(
        &self,
        content_id: i64,
        status: ScanStatus,
        http_code: Option<u16>,
        error_message: Option<&str>,
        when: i64,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO content_scans (content_id, scanned_at, status, http_code, error_message)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (content_id) DO UPDATE SET
                scanned_at = excluded.scanned_at,
                status = excluded.status,
                http_code = excluded.http_code,
                error_message = excluded.error_message
            "#,
            rusqlite::params![content_id, when, status.as_str(), http_code, error_message],
        )?;
        Ok(())
    }

    pub fn get_scan_record(&self, content_id: i64) -> Result<Option<ScanRecord>> {
        let result = self.conn.query_row(
            "SELECT content_id, scanned_at, status, http_code, error_message
             FROM content_scans WHERE content_id = ?",
            [content_id],
            |row| {
                let status: String = row.get(2)?;
                Ok(ScanRecord {
                    content_id: row.get(0)?,
                    scanned_at: row.get(1)?,
                    status: ScanStatus::parse(&status).unwrap_or(ScanStatus::Failed),
                    http_code: row.get(3)?,
                    error_message: row.get(4)?,
                })
            },
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn usage_confirmation(&self, content_id: i64) -> Result<UsageConfirmation> {
        Ok(match self.get_scan_record(content_id)? {
            Some(record) if record.status == ScanStatus::Confirmed => UsageConfirmation::Confirmed,
            _ => UsageConfirmation::NotYetConfirmed,
        })
    }

    /// Page of crawl targets, ordered by content id so `offset` resumes a sweep.
    pub fn get_unscanned_targets(
        &self,
        mode: TargetMode,
        offset: usize,
        limit: usize,
        stale_before: i64,
    ) -> Result<Vec<ScanTarget>> {
        // NULL cutoff selects every published item regardless of scan history.
        let cutoff = match mode {
            TargetMode::All => None,
            TargetMode::Unindexed => Some(stale_before),
        };
        let mut stmt = self.conn.prepare(
            r#"
            SELECT c.id, c.url FROM content_items c
            LEFT JOIN content_scans s ON s.content_id = c.id
            WHERE c.state = 'published' AND c.url IS NOT NULL AND c.id > 0
              AND (?1 IS NULL OR s.content_id IS NULL OR s.scanned_at < ?1)
            ORDER BY c.id
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let targets = stmt
            .query_map(
                rusqlite::params![cutoff, limit as i64, offset as i64],
                |row| {
                    Ok(ScanTarget {
                        content_id: row.get(0)?,
                        url: row.get(1)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(targets)
    }

    pub fn delete_scan_record(&self, content_id: i64) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM content_scans WHERE content_id = ?", [content_id])?;
        Ok(n > 0)
    }
}
