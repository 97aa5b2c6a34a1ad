//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "certrelay.toml",
    "./config/config.toml",
    "./config/certrelay.toml",
    "/etc/certrelay/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        // Start with defaults
        let mut config = AppConfig::default();

        // Try to load from file
        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config);

        config.validate()?;
        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        // Check explicit path first
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        // Check CERTRELAY_CONFIG env var
        if let Ok(path) = env::var("CERTRELAY_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // Search standard paths
        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Broker
        if let Ok(val) = env::var("CERTRELAY_BROKER_URI") {
            config.broker.uri = val;
        }
        if let Ok(val) = env::var("CERTRELAY_BROKER_EXCHANGE") {
            config.broker.exchange = val;
        }
        if let Ok(val) = env::var("CERTRELAY_BROKER_EXCHANGE_PREFIX") {
            config.broker.exchange_prefix = val;
        }
        if let Ok(val) = env::var("CERTRELAY_BROKER_REQUEST_TOPIC_PREFIX") {
            config.broker.request_topic_prefix = val;
        }
        if let Ok(val) = env::var("CERTRELAY_BROKER_RESPONSE_QUEUE") {
            config.broker.response_queue = val;
        }
        if let Ok(val) = env::var("CERTRELAY_BROKER_PREFETCH") {
            if let Ok(prefetch) = val.parse() {
                config.broker.prefetch_count = prefetch;
            }
        }

        // Proxy
        if let Ok(val) = env::var("CERTRELAY_PROXY_DEFAULT_TIMEOUT_SECONDS") {
            if let Ok(timeout) = val.parse() {
                config.proxy.default_timeout_seconds = timeout;
            }
        }
        if let Ok(val) = env::var("CERTRELAY_PROXY_MAX_PENDING") {
            if let Ok(max) = val.parse() {
                config.proxy.max_pending = max;
            }
        }

        // Proxy retry
        if let Ok(val) = env::var("CERTRELAY_RETRY_ENABLED") {
            config.proxy.retry.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("CERTRELAY_RETRY_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                config.proxy.retry.max_attempts = attempts;
            }
        }
        if let Ok(val) = env::var("CERTRELAY_RETRY_INITIAL_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                config.proxy.retry.initial_interval_ms = interval;
            }
        }
        if let Ok(val) = env::var("CERTRELAY_RETRY_MULTIPLIER") {
            if let Ok(multiplier) = val.parse() {
                config.proxy.retry.multiplier = multiplier;
            }
        }
        if let Ok(val) = env::var("CERTRELAY_RETRY_MAX_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                config.proxy.retry.max_interval_ms = interval;
            }
        }

        // Distribution
        if let Ok(val) = env::var("CERTRELAY_DISTRIBUTION_ENABLED") {
            config.distribution.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("CERTRELAY_DISTRIBUTION_REDIS_URL") {
            config.distribution.redis_url = val;
        }
        if let Ok(val) = env::var("CERTRELAY_DISTRIBUTION_CHANNEL") {
            config.distribution.channel = val;
        }

        // General
        if let Ok(val) = env::var("CERTRELAY_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [broker]
            exchange = "test.requests"

            [proxy]
            max_pending = 7
            "#
        )
        .unwrap();

        let loader = ConfigLoader::with_path(file.path());
        let config = loader.load().unwrap();
        assert_eq!(config.broker.exchange, "test.requests");
        assert_eq!(config.proxy.max_pending, 7);
        // Untouched sections keep their defaults
        assert_eq!(config.proxy.default_timeout_seconds, 30);
    }

    #[test]
    fn test_missing_explicit_path_falls_back_to_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/certrelay.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.broker.response_queue, "certrelay.responses");
    }
}
