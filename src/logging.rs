//! Logging setup shared by the orchestrator and every participant process.
//!
//! All processes of a run write to stderr and, optionally, append to the same
//! log file, so the file appender never rotates.
//!
//! # Environment Variables
//!
//! - `IPCRACE_LOG` - Log filter (overrides RUST_LOG)
//! - `IPCRACE_LOG_FORMAT` - Output format: pretty, compact, json
//! - `IPCRACE_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-field format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines
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
    /// Emit ANSI colors on stderr
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            filter: None,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Level from `-v`/`-q` counts: quiet wins, then each `-v` steps down.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            Level::ERROR
        } else {
            match verbose {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };
        Self::default().with_level(level)
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Apply `IPCRACE_LOG` / `RUST_LOG` unless a filter was already set.
    ///
    /// Format and file path come from clap's `env` fallbacks instead.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("IPCRACE_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let default = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                default()
            }),
            None => default(),
        }
    }
}

/// Appender for `path`; a file that cannot be opened only loses file output.
fn file_appender(path: &Path) -> Option<RollingFileAppender> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("ipcrace.log");

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(parent)
        .inspect_err(|e| eprintln!("Warning: Cannot open log file {:?}: {}", path, e))
        .ok()
}

/// Initialize the global tracing subscriber.
///
/// Subsequent calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();
    let appender = config.file_path.as_deref().and_then(file_appender);

    let result = match config.format {
        LogFormat::Json => {
            let stderr_layer = fmt::layer().json().with_writer(std::io::stderr);
            let file_layer = appender.map(|a| fmt::layer().json().with_ansi(false).with_writer(a));

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
        }
        LogFormat::Compact => {
            let stderr_layer = fmt::layer()
                .compact()
                .with_ansi(config.ansi)
                .with_writer(std::io::stderr);
            let file_layer =
                appender.map(|a| fmt::layer().compact().with_ansi(false).with_writer(a));

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
        }
        LogFormat::Pretty => {
            let stderr_layer = fmt::layer()
                .with_ansi(config.ansi)
                .with_writer(std::io::stderr);
            let file_layer = appender.map(|a| fmt::layer().with_ansi(false).with_writer(a));

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
        }
    };

    // Already initialized.
    let _ = result;
}
