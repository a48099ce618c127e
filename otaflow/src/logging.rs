//! Structured logging setup for hosts embedding the updater.
//!
//! The library itself only emits `tracing` events. Hosts without their own
//! subscriber can call [`init_logging`] once at startup.

use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{UpdaterError, UpdaterResult};

/// Default file name of the rolling log.
const DEFAULT_LOG_FILE: &str = "otaflow.log";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set, e.g. `"info"` or `"otaflow=debug"`.
    pub level: String,
    /// Daily-rolling log file, in addition to the console.
    pub file: Option<PathBuf>,
    /// Colored console output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

/// Install the global subscriber.
///
/// Returns the guard of the file writer when file logging is enabled; keep it
/// alive for as long as logs should be flushed to disk.
pub fn init_logging(config: &LoggingConfig) -> UpdaterResult<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console = fmt::layer()
        .with_timer(LocalTime::rfc_3339())
        .with_target(true)
        .with_ansi(config.ansi);

    let (file_layer, guard) = match config.file.as_deref() {
        Some(path) => {
            let (dir, name) = split_log_path(path);
            fs::create_dir_all(&dir).map_err(|e| UpdaterError::CreateDirFailed {
                path: dir.clone(),
                source: e,
            })?;
            let appender = tracing_appender::rolling::daily(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(LocalTime::rfc_3339())
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| UpdaterError::Logging(e.to_string()))?;

    Ok(guard)
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
    (dir, name)
}
