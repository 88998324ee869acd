//! Service configuration.
//!
//! Every configuration point has a default. Values can be set in code with
//! the `with_*` builders or read from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `OBSERVABLE_REQUEST_BASE_URL` | [`ServiceConfig::base_url`] |
//! | `OBSERVABLE_REQUEST_CACHE_TTL_MS` | [`CacheConfig::default_ttl_ms`] |
//! | `OBSERVABLE_REQUEST_COMPARE_ON_SET` | [`CacheConfig::compare_data_on_set`] |
//!
//! # Example
//!
//! ```no_run
//! use observable_request_runtime::config::ServiceConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::from_env()?;
//! println!("Cache TTL: {:?}", config.cache.default_ttl());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the base URL.
pub const ENV_BASE_URL: &str = "OBSERVABLE_REQUEST_BASE_URL";
/// Environment variable holding the default cache TTL in milliseconds.
pub const ENV_CACHE_TTL_MS: &str = "OBSERVABLE_REQUEST_CACHE_TTL_MS";
/// Environment variable toggling compare-on-set.
pub const ENV_COMPARE_ON_SET: &str = "OBSERVABLE_REQUEST_COMPARE_ON_SET";

/// Configuration error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to something that does not parse
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name
        var: String,
        /// Raw value
        value: String,
    },
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default entry TTL in milliseconds
    pub default_ttl_ms: u64,
    /// Suppress notifications for writes that change nothing
    pub compare_data_on_set: bool,
}

impl CacheConfig {
    /// Get the default TTL as Duration
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 300_000,
            compare_data_on_set: true,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Prefix joined to every normalized path
    pub base_url: String,
    /// Cache settings
    pub cache: CacheConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(raw) = lookup(ENV_CACHE_TTL_MS) {
            config.cache.default_ttl_ms = raw.trim().parse().map_err(|_| invalid(ENV_CACHE_TTL_MS, &raw))?;
        }
        if let Some(raw) = lookup(ENV_COMPARE_ON_SET) {
            config.cache.compare_data_on_set = parse_flag(&raw).ok_or_else(|| invalid(ENV_COMPARE_ON_SET, &raw))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if a non-empty base URL is not `http://` or `https://`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.base_url.as_str();
        if !base_url.is_empty() && !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "base_url must start with http:// or https://, got {base_url:?}"
            )));
        }
        Ok(())
    }

    /// Builder: Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Builder: Set the default cache TTL
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.default_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder: Enable or disable compare-on-set
    #[must_use]
    pub const fn with_compare_data_on_set(mut self, enabled: bool) -> Self {
        self.cache.compare_data_on_set = enabled;
        self
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.base_url, "");
        assert_eq!(config.cache.default_ttl(), Duration::from_millis(300_000));
        assert!(config.cache.compare_data_on_set);
    }

    #[test]
    fn test_unset_variables_keep_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://api.example.com"),
            (ENV_CACHE_TTL_MS, "1500"),
            (ENV_COMPARE_ON_SET, "off"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.cache.default_ttl(), Duration::from_millis(1500));
        assert!(!config.cache.compare_data_on_set);
    }

    #[test]
    fn test_unparsable_values_are_errors() {
        let err = ServiceConfig::from_lookup(lookup(&[(ENV_CACHE_TTL_MS, "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: ENV_CACHE_TTL_MS.to_string(),
                value: "soon".to_string()
            }
        );

        assert!(ServiceConfig::from_lookup(lookup(&[(ENV_COMPARE_ON_SET, "maybe")])).is_err());
    }

    #[test]
    fn test_builders() {
        let config = ServiceConfig::default()
            .with_base_url("http://localhost:8080")
            .with_cache_ttl(Duration::from_secs(2))
            .with_compare_data_on_set(false);

        assert_eq!(config.cache.default_ttl_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_without_scheme_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[(ENV_BASE_URL, "api.example.com")])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(ServiceConfig::default().with_base_url("").validate().is_ok());
    }
}
