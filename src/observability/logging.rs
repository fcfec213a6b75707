//! Structured logging configuration.

use crate::config::{LoggingSettings, parse_string_env};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";
const VERBOSE_FILTER: &str = "debug";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; unknown names fall back to `Pretty`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive.
    pub filter: String,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: DEFAULT_FILTER.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// `RUST_LOG` wins over the configured filter; `verbose` raises the
    /// default to `debug` when neither is set.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let format = settings
            .and_then(|s| s.format.as_deref())
            .map(LogFormat::parse)
            .unwrap_or_default();
        let default_filter = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
        let filter = settings
            .and_then(|s| s.filter.clone())
            .unwrap_or_else(|| default_filter.to_string());
        let file = settings.and_then(|s| s.file.as_ref()).map(PathBuf::from);

        let mut config = Self {
            format,
            filter,
            file,
        };

        if let Some(format) = parse_string_env("MOODSCAN_LOG_FORMAT") {
            config.format = LogFormat::parse(&format);
        }
        if let Some(file) = parse_string_env("MOODSCAN_LOG_FILE") {
            config.file = Some(PathBuf::from(file));
        }
        if let Some(filter) = parse_string_env("RUST_LOG") {
            config.filter = filter;
        }

        config
    }

    /// Builds the `EnvFilter`, falling back to `info` on a bad directive.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Pretty);
    }

    #[test]
    fn test_from_settings_reads_file_section() {
        let settings = LoggingSettings {
            format: Some("json".to_string()),
            filter: Some("warn,moodscan=trace".to_string()),
            file: Some("/tmp/moodscan.log".to_string()),
        };
        let config = LoggingConfig::from_settings(Some(&settings), false);

        if std::env::var("MOODSCAN_LOG_FILE").is_err() {
            assert_eq!(config.file, Some(PathBuf::from("/tmp/moodscan.log")));
        }
        if std::env::var("MOODSCAN_LOG_FORMAT").is_err() {
            assert_eq!(config.format, LogFormat::Json);
        }
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(config.filter, "warn,moodscan=trace");
        }
    }

    #[test]
    fn test_verbose_raises_default_filter() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert_eq!(LoggingConfig::from_settings(None, true).filter, "debug");
        assert_eq!(LoggingConfig::from_settings(None, false).filter, "info");
    }
}
