//! Console and file logging.
//!
//! Every run logs to stderr and, unless disabled, to its own file
//! `<log dir>/mirror_<YYYYmmdd_HHMMSS>.log`. `RUST_LOG` overrides the
//! configured level for both.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ResolvedConfig;

/// File name for a run started at `started`
pub fn log_file_name(started: DateTime<Local>) -> String {
    format!("mirror_{}.log", started.format("%Y%m%d_%H%M%S"))
}

/// Install the global subscriber.
///
/// Returns the log file path and the writer guard when file logging is on.
/// Keep the guard alive until exit or buffered lines are lost.
pub fn init_logging(config: &ResolvedConfig) -> Result<Option<(PathBuf, WorkerGuard)>> {
    let level = config.settings.log_level.as_directive();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, file) = match config.log_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let name = log_file_name(Local::now());
            let path = dir.join(&name);
            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some((path, guard)))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("Failed to install the global tracing subscriber")?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name() {
        let started = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 30).unwrap();
        assert_eq!(log_file_name(started), "mirror_20240307_090530.log");
    }
}
