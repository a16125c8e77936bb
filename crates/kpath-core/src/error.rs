//! Configuration error types

use thiserror::Error;

/// Result type alias for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
///
/// These surface once at startup; a process with an invalid configuration
/// never reaches the query path.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// The environment variable name
        key: &'static str,
        /// The raw value as found in the environment
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Two or more settings are individually valid but mutually inconsistent
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

impl ConfigError {
    /// Stable machine-readable code for diagnostics output
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidValue { .. } => "INVALID_VALUE",
            Self::Inconsistent(_) => "INCONSISTENT",
        }
    }
}
