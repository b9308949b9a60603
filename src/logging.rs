//! Tracing subscriber setup.
//!
//! Console output goes to stderr at the configured level (`RUST_LOG`
//! overrides it). When a log file is requested, a second plain-text layer
//! records everything at DEBUG so failed installations can be diagnosed
//! after the fact. A log file that cannot be opened is reported as a
//! warning and logging continues without it. The full-screen interface owns
//! the terminal, so it runs with the console layer switched off.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::types::LogLevel;

/// Default log file, relative to the working directory
pub const DEFAULT_LOG_FILE: &str = "gentootui.log";

/// Install the global subscriber. Fails only if one is already installed.
pub fn init_logging(level: LogLevel, log_file: Option<&Path>, console: bool) -> Result<()> {
    let console = console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter(level))
    });

    let (file, file_error) = match log_file.map(open_log_file).transpose() {
        Ok(file) => (file, None),
        Err(e) => (None, Some(e)),
    };
    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(LevelFilter::DEBUG)
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    match (log_file, file_error) {
        (_, Some(e)) => tracing::warn!("Continuing without a log file: {:#}", e),
        (Some(path), None) => tracing::debug!("Logging to {}", path.display()),
        (None, None) => {}
    }
    Ok(())
}

/// `RUST_LOG` if set and valid, otherwise the configured level
fn console_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// Open `path` for appending, creating parent directories
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_log_file_creates_parents_and_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/nested/gentootui.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_unopenable_log_file_still_installs_subscriber() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-directory");
        fs::write(&blocker, "").unwrap();
        let path = blocker.join("gentootui.log");
        assert!(open_log_file(&path).is_err());

        init_logging(LogLevel::Info, Some(&path), false).unwrap();
        assert!(tracing::dispatcher::has_been_set());
        assert!(!path.exists());
    }
}
