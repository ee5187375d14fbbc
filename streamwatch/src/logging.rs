//! Logging subscriber setup.
//!
//! Console output plus an optional daily-rotated log file, both with local
//! timezone timestamps.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "streamwatch=info,process_utils=info,reqwest=warn";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Initialize logging.
///
/// When `log_dir` is set, a daily-rotated `streamwatch.log` is written there
/// in addition to the console. Keep the returned guard alive for the process
/// lifetime or buffered file output is lost.
pub fn init_logging(log_dir: Option<&Path>) -> crate::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer));

    match log_dir {
        Some(dir) => {
            let log_path = PathBuf::from(dir);
            crate::utils::fs::ensure_dir_all_sync_with_op("creating log directory", &log_path)?;

            let file_appender = tracing_appender::rolling::daily(&log_path, "streamwatch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            registry
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_timer(LocalTimer),
                )
                .try_init()
                .map_err(|e| {
                    crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
                })?;

            Ok(Some(guard))
        }
        None => {
            registry.try_init().map_err(|e| {
                crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
            })?;
            Ok(None)
        }
    }
}
