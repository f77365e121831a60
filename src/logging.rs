//! Logging infrastructure for fpmd.
//!
//! The supervisor daemonizes and workers redirect stdout/stderr to
//! /dev/null, so besides the usual stderr layer an optional rolling log
//! file can be configured. Configuration comes from the environment:
//!
//! - `FPMD_LOG` - Log filter (overrides RUST_LOG)
//! - `FPMD_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `FPMD_LOG_FORMAT` - Output format: pretty, compact, json
//! - `FPMD_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format (default for development)
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

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Pretty)
    pub format: LogFormat,
    /// Path to log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level from a `-v` occurrence count.
    pub fn with_verbosity(mut self, count: u8) -> Self {
        self.level = match count {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        self
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var("FPMD_LOG") {
            self.filter = Some(filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            self.filter = Some(filter);
        }

        if let Ok(level) = std::env::var("FPMD_LOG_LEVEL")
            && let Ok(level) = Level::from_str(&level)
        {
            self.level = level;
        }

        if let Ok(format) = std::env::var("FPMD_LOG_FORMAT")
            && let Ok(format) = format.parse()
        {
            self.format = format;
        }

        if let Ok(path) = std::env::var("FPMD_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    /// Build the env filter for this configuration.
    fn env_filter(&self) -> EnvFilter {
        match &self.filter {
            Some(filter) => EnvFilter::new(filter),
            None => EnvFilter::new(format!("fpmd={}", self.level)),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are no-ops (useful in
/// tests and in worker children that re-enter startup paths).
pub fn init(config: LogConfig) {
    let filter = config.env_filter();

    let file_layer = config.file_path.as_ref().map(|path| {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => std::path::Path::new("."),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fpmd.log".to_string());
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);
        fmt::layer().with_ansi(false).with_writer(appender)
    });

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    // Already initialized is fine.
    let _ = result;
}
