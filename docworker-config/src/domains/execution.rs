//! Document execution configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::validation::{Validatable, validate_at_most, validate_positive};
use crate::error::ConfigResult;

/// Upper bound on plugins running at once inside one worker
pub const MAX_CONCURRENT_PLUGINS_LIMIT: usize = 64;

/// Longest accepted command timeout (30 days)
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Document execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Hard deadline for the whole document, measured from worker start
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_command_timeout")]
    pub command_timeout: Duration,

    /// Maximum number of plugins running at the same time (1 = sequential)
    #[serde(default = "default_max_concurrent_plugins")]
    pub max_concurrent_plugins: usize,

    /// How long a running plugin may take to wind down after cancellation
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_cancel_grace_period")]
    pub cancel_grace_period: Duration,

    /// Capacity of the queue between plugin runner and messaging pipeline
    #[serde(default = "default_result_buffer_size")]
    pub result_buffer_size: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            max_concurrent_plugins: default_max_concurrent_plugins(),
            cancel_grace_period: default_cancel_grace_period(),
            result_buffer_size: default_result_buffer_size(),
        }
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.command_timeout.as_secs(),
            "command_timeout",
            self.domain_name()
        )?;
        validate_at_most(
            self.command_timeout.as_secs(),
            MAX_COMMAND_TIMEOUT.as_secs(),
            "command_timeout",
            self.domain_name()
        )?;

        validate_positive(
            self.max_concurrent_plugins,
            "max_concurrent_plugins",
            self.domain_name()
        )?;
        validate_at_most(
            self.max_concurrent_plugins,
            MAX_CONCURRENT_PLUGINS_LIMIT,
            "max_concurrent_plugins",
            self.domain_name()
        )?;

        validate_positive(
            self.result_buffer_size,
            "result_buffer_size",
            self.domain_name()
        )?;

        // A zero grace period is allowed: running plugins are abandoned at once

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

// Default value functions
fn default_command_timeout() -> Duration {
    Duration::from_secs(172_800) // 48 hours
}

fn default_max_concurrent_plugins() -> usize {
    1
}

fn default_cancel_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_result_buffer_size() -> usize {
    32
}
