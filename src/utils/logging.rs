use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProcessingError, Result};

/// Filter directive for the given settings. `RUST_LOG` wins over everything,
/// then `--verbose`, then the configured level.
pub fn filter_directive(verbose: bool, configured_level: &str) -> String {
    if verbose {
        "tempmap=debug,info".to_string()
    } else {
        configured_level.to_string()
    }
}

/// Size-rotated log file: `path` is rolled to `path.1` .. `path.{backups}`
/// once it would grow past `max_bytes`.
pub fn rotating_file(path: &Path, max_bytes: u64, backups: usize) -> Result<FileRotate<AppendCount>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(FileRotate::new(
        path,
        AppendCount::new(backups),
        ContentLimit::Bytes(max_bytes as usize),
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}

/// Install the global subscriber, writing to `log_file` when given and to
/// stderr otherwise. Call once, from `main`, and keep the returned guard alive
/// until exit so buffered lines are flushed.
pub fn init_logging(
    verbose: bool,
    settings: &LoggingConfig,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(verbose, &settings.level)))
        .map_err(|e| ProcessingError::InvalidConfig(format!("Invalid log level: {}", e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let (result, guard) = match log_file {
        Some(path) => {
            let file = rotating_file(path, settings.max_bytes, settings.backups)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (builder.with_ansi(false).with_writer(writer).try_init(), Some(guard))
        }
        None => (builder.with_writer(std::io::stderr).try_init(), None),
    };

    result.map_err(|e| ProcessingError::InvalidConfig(format!("Logging already initialized: {}", e)))?;
    Ok(guard)
}
