//! Logging setup.
//!
//! Console output is always on; when a log directory is configured a
//! daily-rotated file layer is added and old files are pruned by a
//! background task. Timestamps use the server's local timezone.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "camrelay=info,process_utils=info,tower_http=info";

/// Prefix of rotated log files (`camrelay.log.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "camrelay.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Initialize the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it
/// alive for the lifetime of the process so buffered lines are flushed.
pub fn init_logging(log_dir: Option<&Path>) -> crate::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::ensure_dir_all_sync_with_op("creating log directory", dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}

/// Start the daily log retention cleanup task.
pub fn start_retention_cleanup(log_dir: PathBuf, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let cleanup_interval = Duration::from_secs(24 * 60 * 60);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Log retention cleanup task shutting down");
                    break;
                }
                _ = tokio::time::sleep(cleanup_interval) => {
                    if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                        warn!(error = %e, "Failed to cleanup old logs");
                    }
                }
            }
        }
    });
}

/// Delete rotated log files older than `retention_days`.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(rotated_file_date)
        else {
            continue;
        };

        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

fn rotated_file_date(filename: &str) -> Option<chrono::NaiveDate> {
    let date = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_prefix('.')?;
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}
