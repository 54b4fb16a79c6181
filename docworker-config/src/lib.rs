//! Domain-driven configuration for the document worker
//!
//! Configuration is split by functional domain (execution, channel,
//! identity, logging), each with defaults, validation and environment
//! variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    channel::ChannelConfig,
    execution::{ExecutionConfig, MAX_COMMAND_TIMEOUT},
    identity::{IdentityConfig, IdentitySource},
    logging::{LogFormat, LogLevel, LoggingConfig},
    WorkerConfig,
};

// Re-export utilities
pub use domains::utils::{serde_duration, serde_duration_millis};
