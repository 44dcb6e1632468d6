//! # Logging Utilities
//!
//! `tracing` setup shared by alcfix binaries.
//!
//! The engine logs through two channels: `debug!` for diagnostics, which
//! only show up at debug level, and `info!`/`warn!`/`error!`, which are always
//! on. Console output goes to stderr so command output on stdout stays
//! machine-readable.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `debug`, `alcfix_core=debug`)
//! - `ALCFIX_LOG_FORMAT`: `pretty` (default) or `json`
//! - `ALCFIX_LOG_FILE`: also write to a daily rolling file with this name
//!
//! ## Example
//!
//! ```rust,no_run
//! use alcfix_utils::{init_logging_with_level, LogFormat, LogLevel};
//!
//! let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty).expect("logging");
//! tracing::debug!("visible");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format selector.
pub const FORMAT_VAR: &str = "ALCFIX_LOG_FORMAT";
/// Optional log file.
pub const FILE_VAR: &str = "ALCFIX_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_owned())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level, the engine's diagnostic channel
    Debug,
    /// Trace level
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_owned())),
        }
    }
}

/// Keeps the file writer alive. Dropping it flushes and stops file output.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard
{
    _file: Option<WorkerGuard>,
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig
{
    /// Fallback level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Rolling log file, if any.
    pub file: Option<PathBuf>,
    /// Let `RUST_LOG` override `level`.
    pub respect_rust_log: bool,
}

impl LoggingConfig
{
    /// Settings from `ALCFIX_LOG_FORMAT` and `ALCFIX_LOG_FILE`.
    ///
    /// ## Errors
    ///
    /// Returns [`LoggingError::InvalidFormat`] when `ALCFIX_LOG_FORMAT` is set
    /// to something other than `pretty` or `json`.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        let format = match env::var(FORMAT_VAR) {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::Pretty,
        };
        Ok(Self {
            level: LogLevel::Info,
            format,
            file: env::var_os(FILE_VAR).map(PathBuf::from),
            respect_rust_log: true,
        })
    }

    fn filter(&self) -> EnvFilter
    {
        let fallback = || EnvFilter::new(Level::from(self.level).to_string());
        if self.respect_rust_log {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
        } else {
            fallback()
        }
    }
}

/// Initialize logging from the environment.
///
/// ## Errors
///
/// Returns an error if logging is already initialized, the format variable
/// is invalid or the log file directory cannot be created.
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    init_with_config(&LoggingConfig::from_env()?)
}

/// Initialize logging with an explicit level and format.
///
/// `RUST_LOG` is ignored; `ALCFIX_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the log file
/// directory cannot be created.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    init_with_config(&LoggingConfig {
        level,
        format,
        file: env::var_os(FILE_VAR).map(PathBuf::from),
        respect_rust_log: false,
    })
}

/// Initialize logging from resolved settings.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the log file
/// directory cannot be created.
pub fn init_with_config(config: &LoggingConfig) -> Result<LogGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format, config.filter())];
    let mut guard = LogGuard::default();

    if let Some(path) = &config.file {
        let (layer, worker) = file_layer(path, config.format, config.filter())?;
        layers.push(layer);
        guard._file = Some(worker);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);
    match format {
        LogFormat::Pretty => layer.with_ansi(true).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat, filter: EnvFilter) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let Some(file_name) = path.file_name() else {
        return Err(LoggingError::InvalidFile(path.to_path_buf()));
    };
    std::fs::create_dir_all(directory)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name));
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false);
    let layer = match format {
        LogFormat::Pretty => layer.with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    };
    Ok((layer, guard))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// Log file path without a file name
    #[error("Invalid log file path: {}", .0.display())]
    InvalidFile(PathBuf),

    /// A global subscriber is already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!(matches!("xml".parse::<LogFormat>(), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("dbg".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!(matches!("loud".parse::<LogLevel>(), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_ordering_and_conversion()
    {
        assert!(LogLevel::Debug > LogLevel::Info);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::default()), Level::INFO);
    }

    #[test]
    fn test_file_without_name_is_rejected()
    {
        let result = file_layer(Path::new("/"), LogFormat::Pretty, EnvFilter::new("info"));
        assert!(matches!(result, Err(LoggingError::InvalidFile(_))));
    }
}
