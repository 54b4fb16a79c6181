//! Inter-process communication for the document worker
//!
//! This crate provides the message protocol spoken between a coordinator
//! and an isolated worker process, the `IpcChannel` transport abstraction,
//! and two transports: a file-system channel located by a `ChannelHandle`
//! and an in-memory pair for in-process use.

pub mod error;
pub mod file_channel;
pub mod handle;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use file_channel::{FileChannel, DEFAULT_POLL_INTERVAL};
pub use handle::ChannelHandle;
pub use protocol::{
    CoordinatorMessage, DocumentRequest, DocumentStatus, ExecutionSummary, IoConfig,
    MessageEnvelope, PluginConfig, PluginResult, PluginStatus, WorkerMessage,
    IPC_PROTOCOL_VERSION,
};
pub use transport::{decode_envelope, encode_envelope, ChannelRole, IpcChannel, MemoryChannel};
