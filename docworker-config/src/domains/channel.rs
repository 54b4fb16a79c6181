//! IPC channel configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::validation::{Validatable, validate_positive};
use crate::error::ConfigResult;

/// Where channel directories live and how often inboxes are rescanned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Directory holding one sub-directory per channel handle
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Fallback inbox scan interval when no watcher event arrives
    #[serde(with = "crate::domains::utils::serde_duration_millis", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Validatable for ChannelConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(self.validation_error("root_dir cannot be empty"));
        }
        validate_positive(self.poll_interval.as_millis(), "poll_interval", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "channel"
    }
}

fn default_root_dir() -> PathBuf {
    std::env::temp_dir().join("docworker-ipc")
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_defaults() {
        let config = ChannelConfig::default();
        assert!(config.root_dir.ends_with("docworker-ipc"));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_config_validation() {
        let mut config = ChannelConfig::default();
        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let config = ChannelConfig {
            root_dir: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
