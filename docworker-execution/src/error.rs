//! Error types for document execution

use thiserror::Error;

use docworker_ipc::IpcError;

/// Errors raised by a single plugin.
///
/// These never escape the plugin runner; they become `failed` or
/// `cancelled` plugin results.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The plugin ran and failed; the message is reported verbatim
    #[error("{0}")]
    Failed(String),

    #[error("Invalid plugin configuration: {0}")]
    InvalidConfiguration(String),

    /// The plugin observed cancellation and stopped
    #[error("Plugin cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors from the execution backend and plugin registry
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Plugin already registered: {0}")]
    PluginAlreadyRegistered(String),

    #[error("Plugin task failed: {0}")]
    TaskFailed(String),
}

/// Faults that end the messaging pipeline.
///
/// Only channel and protocol faults are fatal to a worker; everything a
/// plugin does is reported as data.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Channel error: {0}")]
    Channel(#[source] IpcError),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

impl From<IpcError> for PipelineError {
    fn from(err: IpcError) -> Self {
        if err.is_protocol_violation() {
            PipelineError::ProtocolViolation(err.to_string())
        } else {
            PipelineError::Channel(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_failure_message_is_verbatim() {
        assert_eq!(PluginError::failed("boom").to_string(), "boom");
    }

    #[test]
    fn test_ipc_error_classification() {
        let violation: PipelineError = IpcError::InvalidMessage("garbage".to_string()).into();
        assert!(matches!(violation, PipelineError::ProtocolViolation(_)));

        let channel: PipelineError = IpcError::IoError("disk full".to_string()).into();
        assert!(matches!(channel, PipelineError::Channel(IpcError::IoError(_))));

        let closed: PipelineError = IpcError::ConnectionClosed.into();
        assert!(matches!(closed, PipelineError::Channel(IpcError::ConnectionClosed)));
    }
}
