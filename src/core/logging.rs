//! Run log setup: one log file per invocation.

use crate::core::config::{LoggingSection, RunOptions};
use crate::core::error::MultiQueryError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// `<log_path>/<name>.<log_basename>.<env>.<host>.<rundate>.log`
pub fn log_file_path(
    logging: &LoggingSection,
    query_name: &str,
    env: &str,
    host: &str,
    rundate: &str,
) -> PathBuf {
    logging.log_path.join(format!(
        "{}.{}.{}.{}.{}.log",
        query_name, logging.log_basename, env, host, rundate
    ))
}

/// Install the global subscriber writing plain-text records to `path`.
///
/// Level is `debug` when any debug flag is set, `info` otherwise; `RUST_LOG`
/// takes precedence when present.
pub fn init_logging(path: &Path, options: &RunOptions) -> Result<(), MultiQueryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let level = if options.debug.any() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        )
        .with(filter)
        .try_init()
        .map_err(|e| MultiQueryError::LoggingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_name_carries_run_identity() {
        let logging = LoggingSection {
            log_path: PathBuf::from("/var/log/mq"),
            log_basename: "multiquery".to_string(),
        };
        let path = log_file_path(&logging, "daily", "prod", "host1", "20240101-010101");
        assert_eq!(
            path,
            PathBuf::from("/var/log/mq/daily.multiquery.prod.host1.20240101-010101.log")
        );
    }
}
