//! Tracing setup shared by the CLI and the daemon.
//!
//! Records go to journald when the socket is reachable. Otherwise the CLI
//! writes a daily log file (stdout belongs to reports and exports) and the
//! daemon writes to stderr, where a service manager picks it up.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives, e.g. `ASSETUSAGE_LOG=assetusage::crawler=debug,info`.
pub const LOG_ENV: &str = "ASSETUSAGE_LOG";

const LOG_FILE_PREFIX: &str = "assetusage.log";

/// Keeps the file writer flushing until exit.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where records ended up after [`init`] or [`init_daemon`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Journald,
    File(PathBuf),
    Stderr,
}

fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn filter_from_env() -> EnvFilter {
    env_filter(std::env::var(LOG_ENV).ok().as_deref())
}

#[cfg(target_os = "linux")]
fn try_journald() -> Result<bool> {
    let Ok(layer) = tracing_journald::layer() else {
        return Ok(false);
    };
    tracing_subscriber::registry()
        .with(filter_from_env())
        .with(layer)
        .try_init()
        .context("Tracing subscriber already installed")?;
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
fn try_journald() -> Result<bool> {
    Ok(false)
}

/// CLI logging: journald, else `assetusage.log.<date>` under `log_dir`
/// (or [`default_log_dir`]).
pub fn init(log_dir: Option<PathBuf>) -> Result<LogSink> {
    if try_journald()? {
        tracing::debug!("Logging to journald");
        return Ok(LogSink::Journald);
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    init_file(&log_dir)?;
    tracing::debug!(dir = %log_dir.display(), "Logging to file");
    Ok(LogSink::File(log_dir))
}

fn init_file(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(filter_from_env())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .context("Tracing subscriber already installed")?;
    Ok(())
}

/// Daemon logging: journald, else stderr.
pub fn init_daemon() -> Result<LogSink> {
    if try_journald()? {
        return Ok(LogSink::Journald);
    }
    tracing_subscriber::registry()
        .with(filter_from_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Tracing subscriber already installed")?;
    Ok(LogSink::Stderr)
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("assetusage")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_falls_back_to_info() {
        assert_eq!(env_filter(None).to_string(), "info");
        assert_eq!(env_filter(Some("assetusage=loud")).to_string(), "info");
        assert_eq!(
            env_filter(Some("assetusage::crawler=debug")).to_string(),
            "assetusage::crawler=debug"
        );
    }

    #[test]
    fn test_default_log_dir() {
        assert!(default_log_dir().ends_with("assetusage/logs"));
    }
}
