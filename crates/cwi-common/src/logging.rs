//! Logging setup shared by the CWI tools.
//!
//! Wraps `tracing-subscriber` behind a small config type so every binary
//! initializes the same way: an `EnvFilter` built from the configured level
//! plus optional per-module directives, and one fmt layer per output target
//! (stdout, a daily-rotated file, or both). `LOG_*` environment variables
//! override whatever the binary passes in.
//!
//! Prefer the `tracing` macros with fields over `println!`:
//!
//! ```rust
//! use tracing::{info, warn};
//!
//! info!(table = "c4ix", rows = 1250, "Table loaded");
//! warn!(file = "c4ad.csv", "Extract missing, table left as is");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cwi_common::logging::{LogConfig, init_logging};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     info!("Application started");
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Minimum severity that gets through the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The `tracing` level this maps to.
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            other => bail!("Unrecognized log level '{other}'"),
        })
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn as_str(self) -> &'static str {
        match self {
            LogOutput::Console => "console",
            LogOutput::File => "file",
            LogOutput::Both => "both",
        }
    }
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => LogOutput::Console,
            "file" => LogOutput::File,
            "both" | "all" => LogOutput::Both,
            other => bail!("Unrecognized log output '{other}'"),
        })
    }
}

impl std::fmt::Display for LogOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line encoding: human-readable text or one JSON object per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => bail!("Unrecognized log format '{other}'"),
        })
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum level to emit
    pub level: LogLevel,

    /// Output target (console, file, or both)
    pub output: LogOutput,

    /// Line encoding (text or JSON)
    pub format: LogFormat,

    /// Directory for log files (only used when output includes file)
    pub log_dir: PathBuf,

    /// Log file name prefix (e.g., "cwi-ingest" -> "cwi-ingest.2024-01-18.log")
    pub log_file_prefix: String,

    /// Extra filter directives (e.g., "rusqlite=warn,suppaftp=debug")
    /// for fine-tuning specific module log levels
    pub filter_directives: Option<String>,

    /// Include file and line number in each event
    pub include_location: bool,

    /// Include thread IDs in each event
    pub include_thread_ids: bool,

    /// Include the target module path in each event
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "cwi".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `LOG_*` environment variables.
    ///
    /// Unset or empty variables leave the defaults in place; a variable that
    /// is set but unparseable is an error rather than a silent fallback.
    ///
    /// Recognized variables: `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`,
    /// `LOG_DIR`, `LOG_FILE_PREFIX`, `LOG_FILTER`, `LOG_INCLUDE_LOCATION`,
    /// `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(level) = env_var("LOG_LEVEL") {
            config.level = level.parse().context("LOG_LEVEL")?;
        }
        if let Some(output) = env_var("LOG_OUTPUT") {
            config.output = output.parse().context("LOG_OUTPUT")?;
        }
        if let Some(format) = env_var("LOG_FORMAT") {
            config.format = format.parse().context("LOG_FORMAT")?;
        }
        if let Some(dir) = env_var("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env_var("LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }
        if let Some(filter) = env_var("LOG_FILTER") {
            config.filter_directives = Some(filter);
        }
        config.include_location = env_flag("LOG_INCLUDE_LOCATION", config.include_location);
        config.include_thread_ids = env_flag("LOG_INCLUDE_THREAD_IDS", config.include_thread_ids);
        config.include_targets = env_flag("LOG_INCLUDE_TARGETS", config.include_targets);

        Ok(config)
    }

    /// Create a builder for fluent configuration
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_flag(name: &str, default: bool) -> bool {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Builder for LogConfig
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn include_location(mut self, include: bool) -> Self {
        self.config.include_location = include;
        self
    }

    pub fn include_thread_ids(mut self, include: bool) -> Self {
        self.config.include_thread_ids = include;
        self
    }

    pub fn include_targets(mut self, include: bool) -> Self {
        self.config.include_targets = include;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Install the global tracing subscriber described by `config`.
///
/// Call once at process startup; a second installation fails in `try_init`.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![build_filter(config)?.boxed()];

    if matches!(config.output, LogOutput::Console | LogOutput::Both) {
        let layer = fmt::layer()
            .with_target(config.include_targets)
            .with_thread_ids(config.include_thread_ids)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(FmtSpan::CLOSE);
        layers.push(match config.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        });
    }

    if matches!(config.output, LogOutput::File | LogOutput::Both) {
        // No ANSI escapes in files
        let layer = fmt::layer()
            .with_writer(rolling_writer(config)?)
            .with_target(config.include_targets)
            .with_thread_ids(config.include_thread_ids)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false);
        layers.push(match config.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install the tracing subscriber")
}

/// EnvFilter from the configured level and extra directives; `RUST_LOG`
/// is still honored on top.
fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(directives) = &config.filter_directives {
        for directive in directives.split(',').map(str::trim) {
            if directive.is_empty() {
                continue;
            }
            filter = filter.add_directive(
                directive
                    .parse()
                    .with_context(|| format!("Bad filter directive '{directive}'"))?,
            );
        }
    }

    Ok(filter)
}

/// Create the daily-rotating non-blocking file writer.
///
/// The flush guard must stay alive for the life of the process, so it is
/// intentionally leaked here.
fn rolling_writer(config: &LogConfig) -> Result<tracing_appender::non_blocking::NonBlocking> {
    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    std::mem::forget(guard);

    Ok(non_blocking)
}
