//! Ambient configuration for the wayform engine: logging setup and the small
//! set of engine tunables that are not owned by a host application.
//!
//! This crate is library-shaped, not a CLI: values are sourced from
//! `EngineConfig::default()` or `EngineConfig::from_env()`. A host process
//! that wants a CLI layer (flags, a config file) builds it on top and calls
//! into this crate the same way it would call into any other config source.

mod error;
mod logging;

pub use error::ConfigError;
pub use logging::{LogConfig, LogFormat};

/// Environment variable prefix for all engine tunables.
pub const ENV_PREFIX: &str = "WAYFORM_";

/// Engine-level tunables that are not part of the compiled form itself.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Upper bound on handler re-executions per node per `invoke` call before
    /// the evaluator gives up with `maxRetriesExceeded`.
    pub max_retries: u32,

    /// When `true`, a reference/value shape mismatch raises `TYPE_MISMATCH`
    /// instead of silently resolving to `undefined`.
    pub strict_type_mismatch: bool,

    /// When `true` (the default), concurrent `invoke` calls for the same
    /// node id share a single in-flight handler execution.
    pub dedup_in_flight: bool,

    /// Logging configuration for the host to initialize `tracing` with.
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            strict_type_mismatch: false,
            dedup_in_flight: true,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build a config from `WAYFORM_*` environment variables, falling back
    /// to defaults for anything unset or unparseable.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is present but holds a
    /// value that cannot be parsed into its target type.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("WAYFORM_MAX_RETRIES") {
            config.max_retries = raw
                .parse()
                .map_err(|_err| ConfigError::invalid(format!("WAYFORM_MAX_RETRIES: '{raw}'")))?;
        }

        if let Ok(raw) = std::env::var("WAYFORM_STRICT_TYPE_MISMATCH") {
            config.strict_type_mismatch = parse_bool(&raw).ok_or_else(|| {
                ConfigError::invalid(format!("WAYFORM_STRICT_TYPE_MISMATCH: '{raw}'"))
            })?;
        }

        if let Ok(raw) = std::env::var("WAYFORM_DEDUP_IN_FLIGHT") {
            config.dedup_in_flight = parse_bool(&raw)
                .ok_or_else(|| ConfigError::invalid(format!("WAYFORM_DEDUP_IN_FLIGHT: '{raw}'")))?;
        }

        if let Ok(raw) = std::env::var("WAYFORM_LOG_LEVEL") {
            config.log.level = raw;
        }

        if let Ok(raw) = std::env::var("WAYFORM_LOG_FORMAT") {
            config.log.format = raw.parse()?;
        }

        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_retry_bound() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 10);
        assert!(config.dedup_in_flight);
        assert!(!config.strict_type_mismatch);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
