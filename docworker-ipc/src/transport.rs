//! IPC transport abstraction and the in-memory implementation

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Which end of a channel this process holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// The launching process; creates the channel
    Coordinator,
    /// The isolated process; opens a channel that must already exist
    Worker,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Coordinator => write!(f, "coordinator"),
            ChannelRole::Worker => write!(f, "worker"),
        }
    }
}

/// Duplex, message-oriented channel between coordinator and worker.
///
/// Methods take `&self` so one task can block in `receive` while another
/// sends. Implementations serialize concurrent callers of the same
/// direction internally. `receive` must be cancel-safe: dropping the future
/// before it resolves must not lose a message.
#[async_trait]
pub trait IpcChannel: Send + Sync {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive the next message from the other end.
    ///
    /// Returns `IpcError::ConnectionClosed` once the counterpart has gone
    /// away or this side was closed.
    async fn receive<T: DeserializeOwned + Send>(&self) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close this end; later sends and receives fail with `ConnectionClosed`
    async fn close(&self) -> Result<(), IpcError>;
}

#[derive(Deserialize)]
struct VersionProbe {
    protocol_version: u32,
}

/// Serialize an envelope into its wire form
pub fn encode_envelope<T: Serialize>(message: &MessageEnvelope<T>) -> Result<String, IpcError> {
    serde_json::to_string(message).map_err(|e| IpcError::SerializationError(e.to_string()))
}

/// Parse a wire payload, checking the protocol version before the body
pub fn decode_envelope<T: DeserializeOwned>(raw: &str) -> Result<MessageEnvelope<T>, IpcError> {
    let probe: VersionProbe = serde_json::from_str(raw)
        .map_err(|e| IpcError::InvalidMessage(format!("missing envelope header: {}", e)))?;

    if probe.protocol_version != IPC_PROTOCOL_VERSION {
        return Err(IpcError::ProtocolVersionMismatch {
            expected: IPC_PROTOCOL_VERSION,
            actual: probe.protocol_version,
        });
    }

    serde_json::from_str(raw).map_err(|e| IpcError::DeserializationError(e.to_string()))
}

/// In-process channel backed by tokio mpsc queues.
///
/// Payloads still go through the JSON codec, so a `MemoryChannel` pair
/// behaves like the file channel minus the file system.
pub struct MemoryChannel {
    role: ChannelRole,
    outbound: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Create a connected `(coordinator, worker)` pair
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel();
        let (to_coordinator_tx, to_coordinator_rx) = mpsc::unbounded_channel();

        let coordinator = MemoryChannel::new(ChannelRole::Coordinator, to_worker_tx, to_coordinator_rx);
        let worker = MemoryChannel::new(ChannelRole::Worker, to_coordinator_tx, to_worker_rx);
        (coordinator, worker)
    }

    fn new(
        role: ChannelRole,
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            role,
            outbound: std::sync::Mutex::new(Some(outbound)),
            inbound: Mutex::new(inbound),
            closed: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// Send a raw payload, bypassing the codec (for protocol tests)
    pub fn send_raw(&self, payload: impl Into<String>) -> Result<(), IpcError> {
        let guard = self
            .outbound
            .lock()
            .map_err(|_| IpcError::IoError("outbound queue poisoned".to_string()))?;
        let sender = guard.as_ref().ok_or(IpcError::ConnectionClosed)?;
        sender
            .send(payload.into())
            .map_err(|_| IpcError::ConnectionClosed)
    }
}

#[async_trait]
impl IpcChannel for MemoryChannel {
    async fn send<T: Serialize + Send + Sync>(
        &self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IpcError::ConnectionClosed);
        }
        let payload = encode_envelope(message)?;
        self.send_raw(payload)
    }

    async fn receive<T: DeserializeOwned + Send>(&self) -> Result<MessageEnvelope<T>, IpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IpcError::ConnectionClosed);
        }
        let mut inbound = self.inbound.lock().await;
        let payload = inbound.recv().await.ok_or(IpcError::ConnectionClosed)?;
        decode_envelope(&payload)
    }

    async fn close(&self) -> Result<(), IpcError> {
        self.closed.store(true, Ordering::Release);
        // Dropping the sender lets the counterpart observe the close
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
        log::debug!("Closed in-memory {} channel", self.role);
        Ok(())
    }
}
