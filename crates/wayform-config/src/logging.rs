//! Logging configuration, mirroring the shape a host application would hand
//! to `tracing_subscriber` at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ConfigError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed, human-readable format (default).
    #[default]
    Pretty,

    /// Structured JSON, one object per line.
    Json,

    /// Single-line compact format.
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(ConfigError::invalid(format!(
                "invalid log format '{s}', expected 'pretty', 'json', or 'compact'"
            ))),
        }
    }
}

/// Logging configuration handed to `tracing_subscriber` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level, as an `EnvFilter` directive (e.g. `"info"`, `"wayform_engine=debug"`).
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Optional log file path. When unset, logs go to stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Include file and line numbers.
    pub include_file_line: bool,

    /// Include the target (module path).
    pub include_target: bool,

    /// Include thread ids.
    pub include_thread_id: bool,

    /// Include span open/close events.
    pub include_span_events: bool,
}

impl LogConfig {
    /// Initialize the global `tracing` subscriber from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the level directive is malformed or a subscriber
    /// has already been installed.
    pub fn init(&self) -> Result<(), ConfigError> {
        let filter = EnvFilter::try_new(&self.level)
            .map_err(|err| ConfigError::invalid(format!("log level '{}': {err}", self.level)))?;

        let subscriber = tracing_subscriber::registry().with(filter);

        match self.format {
            LogFormat::Pretty => {
                let layer = fmt::layer()
                    .with_file(self.include_file_line)
                    .with_line_number(self.include_file_line)
                    .with_target(self.include_target)
                    .with_thread_ids(self.include_thread_id)
                    .pretty();
                subscriber
                    .with(layer)
                    .try_init()
                    .map_err(|err| ConfigError::logging_init(err.to_string()))?;
            }
            LogFormat::Json => {
                let layer = fmt::layer()
                    .with_file(self.include_file_line)
                    .with_line_number(self.include_file_line)
                    .with_target(self.include_target)
                    .with_thread_ids(self.include_thread_id)
                    .json();
                subscriber
                    .with(layer)
                    .try_init()
                    .map_err(|err| ConfigError::logging_init(err.to_string()))?;
            }
            LogFormat::Compact => {
                let layer = fmt::layer()
                    .with_file(self.include_file_line)
                    .with_line_number(self.include_file_line)
                    .with_target(self.include_target)
                    .with_thread_ids(self.include_thread_id)
                    .compact();
                subscriber
                    .with(layer)
                    .try_init()
                    .map_err(|err| ConfigError::logging_init(err.to_string()))?;
            }
        }

        Ok(())
    }

    /// The configured level as a `tracing::Level`, defaulting to `INFO` when
    /// the string isn't one of the five standard level names.
    #[must_use]
    pub fn tracing_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
            include_file_line: false,
            include_target: true,
            include_thread_id: false,
            include_span_events: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn tracing_level_falls_back_to_info() {
        let mut config = LogConfig::default();
        config.level = "nonsense".to_string();
        assert_eq!(config.tracing_level(), Level::INFO);
    }
}
