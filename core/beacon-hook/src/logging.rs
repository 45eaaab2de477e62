//! Log initialisation for beacon-hook.
//!
//! Logs go to a daily-rolling file under the storage root: editors that spawn
//! the hook rarely show its stderr.

use beacon_core::StorageConfig;
use fs_err as fs;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "beacon-hook.log";

/// Installs the global subscriber. Keep the returned guard alive for the
/// process lifetime or buffered lines are lost on exit.
pub fn init(storage: &StorageConfig, debug_setting: bool) -> Option<WorkerGuard> {
    let debug_enabled = debug_setting
        || env::var("BEACON_DEBUG_LOG")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
            .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let log_dir = storage.logs_dir();
    if let Err(err) = fs::create_dir_all(&log_dir) {
        // No log directory: fall back to stderr rather than running blind.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        tracing::warn!(error = %err, "Log directory unavailable; logging to stderr");
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_ansi(false)
        .with_writer(non_blocking)
        .try_init();

    Some(guard)
}
