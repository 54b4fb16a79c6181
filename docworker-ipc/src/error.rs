//! IPC error types

use thiserror::Error;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Counterpart closed the channel or the channel was closed locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Channel handle failed validation
    #[error("Invalid channel handle '{handle}': {reason}")]
    InvalidHandle { handle: String, reason: String },

    /// Worker tried to open a channel the coordinator never created
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
}

impl IpcError {
    /// True when the counterpart sent something this side cannot interpret.
    ///
    /// The worker treats these exactly like transport failures, but logs
    /// them separately.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            IpcError::ProtocolVersionMismatch { .. }
                | IpcError::InvalidMessage(_)
                | IpcError::DeserializationError(_)
        )
    }

    /// True when the channel can no longer carry messages in either direction
    pub fn is_disconnect(&self) -> bool {
        matches!(self, IpcError::ConnectionClosed)
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}
