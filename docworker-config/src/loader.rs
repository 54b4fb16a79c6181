//! Configuration loading and environment variable handling

use crate::domains::WorkerConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "DOCWORKER".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<WorkerConfig> {
        log::debug!("Loading worker configuration from {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        let mut config: WorkerConfig = serde_yaml::from_str(&content)?;

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config)?;

        // Validate all domains
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<WorkerConfig> {
        let mut config = WorkerConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<WorkerConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut WorkerConfig) -> ConfigResult<()> {
        self.apply_execution_overrides(&mut config.execution)?;
        self.apply_channel_overrides(&mut config.channel)?;
        self.apply_identity_overrides(&mut config.identity)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply execution config overrides
    fn apply_execution_overrides(
        &self,
        config: &mut crate::domains::execution::ExecutionConfig,
    ) -> ConfigResult<()> {
        if let Some(seconds) = self.parse_env_var::<u64>("COMMAND_TIMEOUT_SECONDS")? {
            config.command_timeout = Duration::from_secs(seconds);
        }

        if let Some(max) = self.parse_env_var::<usize>("MAX_CONCURRENT_PLUGINS")? {
            config.max_concurrent_plugins = max;
        }

        if let Some(seconds) = self.parse_env_var::<u64>("CANCEL_GRACE_PERIOD_SECONDS")? {
            config.cancel_grace_period = Duration::from_secs(seconds);
        }

        Ok(())
    }

    /// Apply channel config overrides
    fn apply_channel_overrides(
        &self,
        config: &mut crate::domains::channel::ChannelConfig,
    ) -> ConfigResult<()> {
        if let Ok(root) = self.get_env_var("CHANNEL_ROOT") {
            config.root_dir = PathBuf::from(root);
        }

        if let Some(millis) = self.parse_env_var::<u64>("CHANNEL_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(millis);
        }

        Ok(())
    }

    /// Apply identity config overrides
    fn apply_identity_overrides(
        &self,
        config: &mut crate::domains::identity::IdentityConfig,
    ) -> ConfigResult<()> {
        if let Ok(path) = self.get_env_var("IDENTITY_FILE") {
            config.runtime_config_path = PathBuf::from(path);
        }

        if let Ok(sources) = self.get_env_var("IDENTITY_SOURCES") {
            config.sources = sources
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(crate::domains::identity::IdentitySource::from_str)
                .collect::<Result<_, _>>()
                .map_err(|e| ConfigError::EnvError(format!("Invalid IDENTITY_SOURCES: {}", e)))?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
