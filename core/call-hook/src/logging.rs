//! File logging for call-hook.
//!
//! The CLI is invoked by the telephony host, so stderr is not a place anyone
//! reads. Logs go to `~/.privacycall/logs/call-hook.log.YYYY-MM-DD`.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "call-hook.log";

/// Keeps the non-blocking writer alive; pending lines are flushed on drop.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

pub fn log_dir() -> Option<PathBuf> {
    screening_core::config::base_dir().map(|base| base.join("logs"))
}

/// Initializes file logging. Returns `None` (logging disabled) when the log
/// directory cannot be created; the command itself still runs.
pub fn init() -> Option<LoggingGuard> {
    let dir = log_dir()?;
    if fs_err::create_dir_all(&dir).is_err() {
        return None;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    if tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        return None;
    }

    Some(LoggingGuard { _guard: guard })
}
