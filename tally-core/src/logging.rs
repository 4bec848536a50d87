//! Logging for the tally binaries.
//!
//! Every binary writes to a daily-rolling `tally.log` under
//! `$XDG_STATE_HOME/tally/`; the terminal is left to command output.
//! `RUST_LOG` overrides the configured level per target.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

const LOG_FILE_NAME: &str = "tally.log";

/// Keeps the background log writer alive; pending lines are flushed on drop.
pub struct LoggingGuard {
    _worker: tracing_appender::non_blocking::WorkerGuard,
}

/// Install the file subscriber in the XDG state directory.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    init_in(&Config::state_dir(), config)
}

/// Install the file subscriber writing to `log_dir`.
///
/// A bad `logging.level` is a config error. If a subscriber is already
/// installed the existing one keeps running.
pub fn init_in(log_dir: &Path, config: &LoggingConfig) -> Result<LoggingGuard> {
    let level: LevelFilter = config
        .level
        .parse()
        .map_err(|_| Error::Config(format!("invalid logging.level '{}'", config.level)))?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            log_dir = %log_dir.display(),
            level = %config.level,
            "Logging initialized"
        );
    }

    Ok(LoggingGuard { _worker: worker })
}

/// Route tracing output through the test harness's captured stdout.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_invalid_level_is_config_error() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            level: "chatty".to_string(),
        };

        let result = init_in(&dir.path().join("logs"), &config);
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!dir.path().join("logs").exists());
    }

    #[test]
    fn test_init_creates_log_dir() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("state").join("tally");

        let _guard = init_in(&log_dir, &LoggingConfig::default()).unwrap();
        assert!(log_dir.is_dir());
    }
}
