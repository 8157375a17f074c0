//! Redacted-documents cache configuration.
//!
//! Three tunables bound the cache: how many users it tracks, how many
//! document outcomes it keeps per user, and how long an entry may sit idle
//! before it expires. Entries are tiny fixed-size booleans, so the per-user
//! bound defaults high while the user bound stays moderate.
//!
//! # Example (TOML)
//!
//! ```toml
//! [security.cache]
//! max_users = 100
//! max_documents_per_user = 50000
//! idle_expiry = "15m"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SecurityError, SecurityResult};

/// Environment variable overriding [`SecurityCacheConfig::max_users`].
pub const MAX_CACHED_USERS_ENV: &str = "ENTITYSEARCH_MAX_CACHED_USERS";

/// Environment variable overriding [`SecurityCacheConfig::max_documents_per_user`].
pub const MAX_CACHED_DOCUMENTS_ENV: &str = "ENTITYSEARCH_MAX_CACHED_DOCUMENTS_PER_USER";

/// Environment variable overriding [`SecurityCacheConfig::idle_expiry`]
/// (humantime format, e.g. `"15m"` or `"90s"`).
pub const CACHE_IDLE_EXPIRY_ENV: &str = "ENTITYSEARCH_CACHE_IDLE_EXPIRY";

/// Bounds and expiry for the shared redacted-documents cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityCacheConfig {
    /// Maximum number of users with a live sub-cache.
    pub max_users: usize,

    /// Maximum number of cached document outcomes per user.
    pub max_documents_per_user: usize,

    /// How long an entry may go unread before it expires.
    #[serde(with = "humantime_serde")]
    pub idle_expiry: Duration,
}

impl Default for SecurityCacheConfig {
    fn default() -> Self {
        Self {
            max_users: 100,
            max_documents_per_user: 50_000,
            idle_expiry: Duration::from_secs(15 * 60),
        }
    }
}

impl SecurityCacheConfig {
    /// Validate the configuration, failing fast on unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::InvalidCacheConfig`] when either bound is
    /// zero or the idle expiry is not a positive duration.
    pub fn validate(&self) -> SecurityResult<()> {
        if self.max_users == 0 {
            return Err(SecurityError::invalid_cache_config(
                "max_users must be at least 1",
            ));
        }
        if self.max_documents_per_user == 0 {
            return Err(SecurityError::invalid_cache_config(
                "max_documents_per_user must be at least 1",
            ));
        }
        if self.idle_expiry.is_zero() {
            return Err(SecurityError::invalid_cache_config(
                "idle_expiry must be a positive duration",
            ));
        }
        Ok(())
    }

    /// Build a configuration from defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::InvalidConfigValue`] when an override is
    /// set but unparseable, and [`SecurityError::InvalidCacheConfig`] when
    /// the resulting configuration fails validation.
    pub fn from_env() -> SecurityResult<Self> {
        let mut config = Self::default();

        if let Some(raw) = read_env(MAX_CACHED_USERS_ENV) {
            config.max_users = raw.parse().map_err(|_| {
                SecurityError::invalid_config_value(
                    MAX_CACHED_USERS_ENV,
                    format!("expected a positive integer, got {raw:?}"),
                )
            })?;
        }

        if let Some(raw) = read_env(MAX_CACHED_DOCUMENTS_ENV) {
            config.max_documents_per_user = raw.parse().map_err(|_| {
                SecurityError::invalid_config_value(
                    MAX_CACHED_DOCUMENTS_ENV,
                    format!("expected a positive integer, got {raw:?}"),
                )
            })?;
        }

        if let Some(raw) = read_env(CACHE_IDLE_EXPIRY_ENV) {
            config.idle_expiry = humantime::parse_duration(&raw).map_err(|error| {
                SecurityError::invalid_config_value(
                    CACHE_IDLE_EXPIRY_ENV,
                    format!("expected a duration such as \"15m\": {error}"),
                )
            })?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SecurityCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_users, 100);
        assert_eq!(config.max_documents_per_user, 50_000);
        assert_eq!(config.idle_expiry, Duration::from_secs(900));
    }

    #[test]
    fn test_zero_bounds_are_rejected() {
        let config = SecurityCacheConfig {
            max_users: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SecurityError::InvalidCacheConfig { .. })
        ));

        let config = SecurityCacheConfig {
            max_documents_per_user: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_expiry_is_rejected() {
        let config = SecurityCacheConfig {
            idle_expiry: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserializes_humantime_durations() {
        let config: SecurityCacheConfig = serde_json::from_value(serde_json::json!({
            "max_users": 10,
            "max_documents_per_user": 1000,
            "idle_expiry": "5m"
        }))
        .unwrap();

        assert_eq!(config.max_users, 10);
        assert_eq!(config.idle_expiry, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: SecurityCacheConfig = serde_json::from_value(serde_json::json!({
            "max_users": 7
        }))
        .unwrap();

        assert_eq!(config.max_users, 7);
        assert_eq!(config.max_documents_per_user, 50_000);
    }
}
