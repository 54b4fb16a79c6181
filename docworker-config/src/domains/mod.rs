//! Domain-specific configuration modules

pub mod channel;
pub mod execution;
pub mod identity;
pub mod logging;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main worker configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkerConfig {
    /// Document execution configuration
    #[serde(default)]
    pub execution: execution::ExecutionConfig,

    /// IPC channel configuration
    #[serde(default)]
    pub channel: channel::ChannelConfig,

    /// Identity resolution configuration
    #[serde(default)]
    pub identity: identity::IdentityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl WorkerConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.execution.validate()?;
        self.channel.validate()?;
        self.identity.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = WorkerConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
