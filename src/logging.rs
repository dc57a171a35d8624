//! Logging setup shared by the supervisor and its workers.
//!
//! Both roles write to stderr; workers inherit the supervisor's stderr, so
//! one stream shows the whole system. The supervisor forwards its effective
//! filter and format to workers with [`LogConfig::worker_env`].
//!
//! # Environment Variables
//!
//! - `POOLVISOR_LOG` - Log filter (overrides RUST_LOG)
//! - `POOLVISOR_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `POOLVISOR_LOG_FORMAT` - Output format: pretty, compact, json
//! - `POOLVISOR_LOG_FILE` - Path to log file (in addition to stderr)
//! - `POOLVISOR_LOG_ROTATION` - Log file rotation: hourly, daily, never
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use poolvisor::logging::{LogConfig, init};
//!
//! init(LogConfig::default().with_env_overrides());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, MakeWriter, time::ChronoLocal},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Filter variable read by [`LogConfig::with_env_overrides`].
pub const LOG_ENV: &str = "POOLVISOR_LOG";
/// Level variable, used when no filter is set.
pub const LOG_LEVEL_ENV: &str = "POOLVISOR_LOG_LEVEL";
/// Format variable.
pub const LOG_FORMAT_ENV: &str = "POOLVISOR_LOG_FORMAT";
/// File variable.
pub const LOG_FILE_ENV: &str = "POOLVISOR_LOG_FILE";
/// Rotation variable for the log file.
pub const LOG_ROTATION_ENV: &str = "POOLVISOR_LOG_ROTATION";

/// Timestamp layout, e.g. `[Thu Oct 16 14:03:07 2026]`.
const TIMESTAMP_FORMAT: &str = "[%a %b %d %H:%M:%S %Y]";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-field format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Log rotation configuration for file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    /// Rotate hourly
    Hourly,
    /// Rotate daily
    Daily,
    /// Never rotate (single file, default)
    #[default]
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "Unknown log rotation: '{}'. Valid options: hourly, daily, never",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration.
///
/// Use the builder methods to customize, then pass to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Pretty)
    pub format: LogFormat,
    /// Path to log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    /// Log rotation for file output (default: Never)
    pub rotation: LogRotation,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs (default: false)
    pub show_target: bool,
    /// ANSI colours on stderr (default: true)
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            rotation: LogRotation::Never,
            filter: None,
            show_target: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the log file path.
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Set log rotation.
    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set a custom filter string.
    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Enable or disable ANSI colours on stderr.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// Reads from:
    /// - `POOLVISOR_LOG` or `RUST_LOG` for filter (only if filter not already set)
    /// - `POOLVISOR_LOG_LEVEL` for level (only if filter not already set)
    /// - `POOLVISOR_LOG_FORMAT` for format
    /// - `POOLVISOR_LOG_FILE` for file path
    /// - `POOLVISOR_LOG_ROTATION` for file rotation
    ///
    /// A filter set from the command line wins over the environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = var(LOG_ENV).or_else(|| var("RUST_LOG"));
        }

        if self.filter.is_none()
            && let Some(level) = var(LOG_LEVEL_ENV).as_deref().and_then(parse_level)
        {
            self.level = level;
        }

        if let Some(format) = var(LOG_FORMAT_ENV)
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Some(path) = var(LOG_FILE_ENV) {
            self = self.with_file(PathBuf::from(path));
        }

        if let Some(rotation) = var(LOG_ROTATION_ENV) {
            match rotation.parse() {
                Ok(r) => self = self.with_rotation(r),
                Err(e) => eprintln!("Warning: {}, keeping '{}'", e, self.rotation),
            }
        }

        self
    }

    /// Filter directive actually in effect.
    pub fn effective_filter(&self) -> String {
        self.filter
            .clone()
            .unwrap_or_else(|| self.level.to_string().to_lowercase())
    }

    /// Environment that makes a worker log the way this process does.
    ///
    /// The log file is not forwarded; workers only write to the stderr they
    /// inherit from the supervisor.
    pub fn worker_env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            (LOG_ENV, self.effective_filter()),
            (LOG_FORMAT_ENV, self.format.to_string()),
        ];
        if !self.ansi {
            env.push(("NO_COLOR", "1".to_string()));
        }
        env
    }

    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.effective_filter()).unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log filter '{}', using default",
                self.effective_filter()
            );
            EnvFilter::new(self.level.to_string().to_lowercase())
        })
    }
}

/// Parse a log level string.
fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// One formatting layer for `writer` in the configured format.
fn format_layer<S, W>(
    config: &LogConfig,
    ansi: bool,
    writer: W,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let timer = ChronoLocal::new(TIMESTAMP_FORMAT.to_string());
    match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(timer)
            .with_target(config.show_target)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_timer(timer)
            .with_target(config.show_target)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(timer)
            .with_target(config.show_target)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    }
}

fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("poolvisor.log");

    RollingFileAppender::new(rotation.into(), parent, file_name)
}

/// Initialize the global tracing subscriber.
///
/// Logs to stderr, and additionally to `config.file_path` when set.
/// Call once at startup; later calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();
    let stderr_layer = format_layer(&config, config.ansi, std::io::stderr);
    let file_layer = config
        .file_path
        .as_deref()
        .map(|path| format_layer(&config, false, file_appender(path, config.rotation)));

    // Already initialized is fine
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_rotation_from_str() {
        assert_eq!("daily".parse::<LogRotation>().unwrap(), LogRotation::Daily);
        assert_eq!("never".parse::<LogRotation>().unwrap(), LogRotation::Never);
        assert!("weekly".parse::<LogRotation>().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("INFO"), Some(Level::INFO));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file_path.is_none());
        assert_eq!(config.effective_filter(), "info");
    }

    #[test]
    fn test_env_filter_precedence() {
        let config = LogConfig::new().with_overrides_from(env_of(&[
            (LOG_ENV, "poolvisor=debug"),
            ("RUST_LOG", "warn"),
        ]));
        assert_eq!(config.effective_filter(), "poolvisor=debug");

        let config = LogConfig::new().with_overrides_from(env_of(&[("RUST_LOG", "warn")]));
        assert_eq!(config.effective_filter(), "warn");
    }

    #[test]
    fn test_cli_filter_beats_env() {
        let config = LogConfig::new()
            .with_filter("trace".to_string())
            .with_overrides_from(env_of(&[(LOG_ENV, "error"), (LOG_LEVEL_ENV, "debug")]));
        assert_eq!(config.effective_filter(), "trace");
    }

    #[test]
    fn test_env_level_format_and_file() {
        let config = LogConfig::new().with_overrides_from(env_of(&[
            (LOG_LEVEL_ENV, "debug"),
            (LOG_FORMAT_ENV, "json"),
            (LOG_FILE_ENV, "/tmp/poolvisor.log"),
        ]));
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/poolvisor.log")));
        assert_eq!(config.rotation, LogRotation::Never);
    }

    #[test]
    fn test_env_rotation() {
        let config = LogConfig::new().with_overrides_from(env_of(&[
            (LOG_FILE_ENV, "/tmp/poolvisor.log"),
            (LOG_ROTATION_ENV, "Daily"),
        ]));
        assert_eq!(config.rotation, LogRotation::Daily);

        let config = LogConfig::new().with_overrides_from(env_of(&[(LOG_ROTATION_ENV, "weekly")]));
        assert_eq!(config.rotation, LogRotation::Never);
    }

    #[test]
    fn test_worker_env_round_trips_settings() {
        let parent = LogConfig::new()
            .with_filter("debug".to_string())
            .with_format(LogFormat::Compact)
            .with_ansi(false);
        let forwarded = parent.worker_env();
        assert!(forwarded.contains(&("NO_COLOR", "1".to_string())));

        let lookup: Vec<(&str, &str)> = forwarded.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let child = LogConfig::new().with_overrides_from(env_of(&lookup));
        assert_eq!(child.effective_filter(), "debug");
        assert_eq!(child.format, LogFormat::Compact);
    }
}
