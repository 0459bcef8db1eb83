/// Configuration errors: malformed environment values or log setup failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A config value was present but could not be parsed.
    #[error("invalid configuration value: {0}")]
    Invalid(String),

    /// `tracing_subscriber` initialization failed.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

impl ConfigError {
    /// Build an [`ConfigError::Invalid`].
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Build an [`ConfigError::LoggingInit`].
    #[must_use]
    pub fn logging_init(msg: impl Into<String>) -> Self {
        Self::LoggingInit(msg.into())
    }
}
