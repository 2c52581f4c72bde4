/// Logging setup: console output plus, for the long-running monitor, a daily rolling file.
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::paths::LOG_FILE_PREFIX;

/// Rolled log files kept on disk.
pub const MAX_LOG_FILES: usize = 10;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Console-only logging for the one-shot commands.
pub fn init_console() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Console plus `log_dir/dock-monitor.log.YYYY-MM-DD`.
///
/// The returned guard flushes the file writer on drop; hold it for the process lifetime.
pub fn init_with_file(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .context("Failed to create rolling log file")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(guard)
}
