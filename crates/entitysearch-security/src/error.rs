//! Security layer error types.
//!
//! Malformed label expressions are deliberately *not* represented here:
//! they never surface as errors to callers. Filtering treats them as a
//! deny at their scope and logs a warning instead.

use thiserror::Error;

/// Errors that can occur while constructing security components.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The security options passed to a context are unusable.
    #[error("Invalid security options: {message}")]
    InvalidOptions {
        /// Description of the invalid option.
        message: String,
    },

    /// The redacted-documents cache configuration is unusable.
    #[error("Invalid cache configuration: {message}")]
    InvalidCacheConfig {
        /// Description of the invalid setting.
        message: String,
    },

    /// A configuration value sourced from the environment failed to parse.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfigValue {
        /// The configuration key (environment variable name).
        key: String,
        /// Description of the parse failure.
        message: String,
    },
}

impl SecurityError {
    /// Create a new InvalidOptions error
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Create a new InvalidCacheConfig error
    pub fn invalid_cache_config(message: impl Into<String>) -> Self {
        Self::InvalidCacheConfig {
            message: message.into(),
        }
    }

    /// Create a new InvalidConfigValue error
    pub fn invalid_config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type SecurityResult<T> = std::result::Result<T, SecurityError>;
