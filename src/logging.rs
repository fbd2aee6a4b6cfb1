//! Logging setup for the zhf binary.
//!
//! # Environment Variables
//!
//! - `ZHF_LOG` - Log filter (overrides RUST_LOG)
//! - `ZHF_LOG_FORMAT` - Output format: pretty, compact, json
//! - `ZHF_LOG_FILE` - Also write logs to this file
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! Verbosity flags given on the command line win over all of the above.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human readable output.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON, for cron logs shipped elsewhere.
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

/// Logging configuration, built from CLI flags and then [`LogConfig::with_env_overrides`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO).
    pub level: Level,
    pub format: LogFormat,
    /// Additional log file (None = stderr only).
    pub file_path: Option<PathBuf>,
    /// Explicit filter directive; takes precedence over `level`.
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
    /// Map `-v`/`-q` counts to a level. Quiet wins.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            Level::WARN
        } else {
            match verbose {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };
        let mut config = Self::default().with_level(level);
        if quiet || verbose > 0 {
            // Pin the filter so ZHF_LOG/RUST_LOG cannot override explicit flags.
            config.filter = Some(level.to_string().to_lowercase());
        }
        config
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

    /// Apply `ZHF_LOG`, `RUST_LOG`, `ZHF_LOG_FORMAT` and `ZHF_LOG_FILE`.
    ///
    /// Values already set (from the command line) are kept.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            self.filter = std::env::var("ZHF_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .ok();
        }

        if let Ok(format) = std::env::var("ZHF_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if self.file_path.is_none()
            && let Ok(path) = std::env::var("ZHF_LOG_FILE")
        {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// A fmt layer in the requested format over an arbitrary writer.
fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Pretty => base.boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Json => base.json().boxed(),
    }
}

/// Initialize the global tracing subscriber.
///
/// Logs always go to stderr; when `config.file_path` is set they are also appended to that
/// file. Calling this twice is harmless, the second call is ignored.
pub fn init(config: LogConfig) {
    let mut layers: Vec<BoxedLayer> = vec![format_layer(config.format, std::io::stderr, true)];

    if let Some(ref path) = config.file_path {
        let parent = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("zhf.log");
        let appender = tracing_appender::rolling::never(parent, file_name);
        layers.push(format_layer(config.format, appender, false));
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_format_display_round_trips() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LogConfig::from_verbosity(0, false).level, Level::INFO);
        assert_eq!(LogConfig::from_verbosity(1, false).level, Level::DEBUG);
        assert_eq!(LogConfig::from_verbosity(3, false).level, Level::TRACE);
        assert_eq!(LogConfig::from_verbosity(2, true).level, Level::WARN);
    }

    #[test]
    fn test_default_verbosity_leaves_filter_open() {
        assert!(LogConfig::from_verbosity(0, false).filter.is_none());
        assert_eq!(
            LogConfig::from_verbosity(1, false).filter.as_deref(),
            Some("debug")
        );
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::from_verbosity(1, false)
            .with_format(LogFormat::Json)
            .with_file(PathBuf::from("/tmp/zhf.log"));

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.as_deref(), Some("debug"));
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/zhf.log")));
    }
}
