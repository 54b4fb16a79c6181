//! File-system backed channel.
//!
//! Layout under the channel root:
//!
//! ```text
//! <root>/<handle>/to_worker/        messages for the worker
//! <root>/<handle>/to_coordinator/   messages for the coordinator
//! ```
//!
//! Each message is a single JSON file named `<session>-<seq>.msg`, published
//! by writing a hidden temp file and renaming it. Readers consume the
//! lexicographically smallest message, delete it and decode it. A `notify`
//! watcher on the inbox wakes blocked readers; a poll interval covers
//! platforms or file systems where watching is unavailable.

use async_trait::async_trait;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::IpcError;
use crate::handle::ChannelHandle;
use crate::protocol::MessageEnvelope;
use crate::transport::{decode_envelope, encode_envelope, ChannelRole, IpcChannel};

const TO_WORKER_DIR: &str = "to_worker";
const TO_COORDINATOR_DIR: &str = "to_coordinator";
const MESSAGE_EXTENSION: &str = "msg";

/// Default wait between inbox scans when no watcher event arrives
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Inbox {
    dir: PathBuf,
    wake_rx: Option<mpsc::Receiver<()>>,
}

/// Channel whose messages are files in a shared directory
pub struct FileChannel {
    handle: ChannelHandle,
    role: ChannelRole,
    channel_dir: PathBuf,
    outbox: PathBuf,
    inbox: Mutex<Inbox>,
    watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
    session: i64,
    sequence: AtomicU64,
    closed: watch::Sender<bool>,
    poll_interval: Duration,
}

impl FileChannel {
    /// Open one end of the channel named `handle` under `root`.
    ///
    /// The coordinator creates the directory tree. The worker requires the
    /// coordinator to have created it and fails with
    /// `IpcError::ChannelNotFound` otherwise.
    pub async fn open(
        root: impl AsRef<Path>,
        handle: &ChannelHandle,
        role: ChannelRole,
    ) -> Result<Self, IpcError> {
        let channel_dir = root.as_ref().join(handle.as_str());

        match role {
            ChannelRole::Coordinator => {
                tokio::fs::create_dir_all(&channel_dir).await?;
            }
            ChannelRole::Worker => {
                let exists = tokio::fs::metadata(&channel_dir)
                    .await
                    .map(|meta| meta.is_dir())
                    .unwrap_or(false);
                if !exists {
                    return Err(IpcError::ChannelNotFound(channel_dir.display().to_string()));
                }
            }
        }

        let to_worker = channel_dir.join(TO_WORKER_DIR);
        let to_coordinator = channel_dir.join(TO_COORDINATOR_DIR);
        tokio::fs::create_dir_all(&to_worker).await?;
        tokio::fs::create_dir_all(&to_coordinator).await?;

        let (inbox_dir, outbox) = match role {
            ChannelRole::Coordinator => (to_coordinator, to_worker),
            ChannelRole::Worker => (to_worker, to_coordinator),
        };

        let (wake_tx, wake_rx) = mpsc::channel(1);
        let watcher = match watch_inbox(&inbox_dir, wake_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!(
                    "File watching unavailable for {}, falling back to polling: {}",
                    inbox_dir.display(),
                    e
                );
                None
            }
        };

        log::debug!("Opened {} end of channel {} at {}", role, handle, channel_dir.display());

        Ok(Self {
            handle: handle.clone(),
            role,
            channel_dir,
            outbox,
            inbox: Mutex::new(Inbox {
                dir: inbox_dir,
                wake_rx: Some(wake_rx),
            }),
            watcher: std::sync::Mutex::new(watcher),
            session: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            sequence: AtomicU64::new(0),
            closed: watch::Sender::new(false),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the inbox poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Whether a channel directory for `handle` exists under `root`
    pub async fn exists(root: impl AsRef<Path>, handle: &ChannelHandle) -> bool {
        tokio::fs::metadata(root.as_ref().join(handle.as_str()))
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    /// Close this end and remove the channel directory.
    ///
    /// Only the coordinator owns the channel's lifetime; a worker calling
    /// this gets `IpcError::InvalidMessage`.
    pub async fn destroy(&self) -> Result<(), IpcError> {
        if self.role != ChannelRole::Coordinator {
            return Err(IpcError::InvalidMessage(
                "only the coordinator may destroy a channel".to_string(),
            ));
        }
        self.close().await?;
        match tokio::fs::remove_dir_all(&self.channel_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn channel_dir(&self) -> &Path {
        &self.channel_dir
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn next_message_name(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{:020}-{:010}.{}", self.session, seq, MESSAGE_EXTENSION)
    }
}

fn watch_inbox(dir: &Path, wake_tx: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        // A full queue already holds a pending wake
        Ok(_) => {
            let _ = wake_tx.try_send(());
        }
        Err(e) => log::warn!("Channel watcher error: {}", e),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Oldest published message in `dir`, if any
async fn oldest_message(dir: &Path) -> Result<Option<PathBuf>, IpcError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(IpcError::ConnectionClosed),
        Err(e) => return Err(e.into()),
    };

    let mut oldest: Option<(String, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_message = !name.starts_with('.')
            && Path::new(&name).extension().and_then(|ext| ext.to_str()) == Some(MESSAGE_EXTENSION);
        if !is_message {
            continue;
        }
        if oldest.as_ref().map_or(true, |(current, _)| name < *current) {
            oldest = Some((name, entry.path()));
        }
    }

    Ok(oldest.map(|(_, path)| path))
}

async fn next_wake(wake_rx: &mut Option<mpsc::Receiver<()>>) {
    let disconnected = match wake_rx.as_mut() {
        Some(rx) => rx.recv().await.is_none(),
        None => return std::future::pending().await,
    };
    if disconnected {
        *wake_rx = None;
    }
}

#[async_trait]
impl IpcChannel for FileChannel {
    async fn send<T: Serialize + Send + Sync>(
        &self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        if self.is_closed() {
            return Err(IpcError::ConnectionClosed);
        }

        let payload = encode_envelope(message)?;
        let name = self.next_message_name();
        let temp_path = self.outbox.join(format!(".{}.tmp", name));
        let final_path = self.outbox.join(&name);

        tokio::fs::write(&temp_path, payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IpcError::ConnectionClosed
            } else {
                e.into()
            }
        })?;
        tokio::fs::rename(&temp_path, &final_path).await?;

        log::trace!("Channel {} ({}) published {}", self.handle, self.role, name);
        Ok(())
    }

    async fn receive<T: DeserializeOwned + Send>(&self) -> Result<MessageEnvelope<T>, IpcError> {
        let mut inbox = self.inbox.lock().await;
        let mut closed_rx = self.closed.subscribe();

        loop {
            if *closed_rx.borrow_and_update() {
                return Err(IpcError::ConnectionClosed);
            }

            if let Some(path) = oldest_message(&inbox.dir).await? {
                let payload = tokio::fs::read_to_string(&path).await?;
                // Synchronous so the message cannot be consumed without being returned
                std::fs::remove_file(&path)?;
                return decode_envelope(&payload);
            }

            tokio::select! {
                _ = next_wake(&mut inbox.wake_rx) => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = closed_rx.changed() => {}
            }
        }
    }

    async fn close(&self) -> Result<(), IpcError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        if let Ok(mut watcher) = self.watcher.lock() {
            watcher.take();
        }
        log::debug!("Closed {} end of channel {}", self.role, self.handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CoordinatorMessage, ExecutionSummary, WorkerMessage};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn handle(raw: &str) -> ChannelHandle {
        ChannelHandle::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_worker_requires_existing_channel() {
        let root = TempDir::new().unwrap();
        let err = FileChannel::open(root.path(), &handle("missing"), ChannelRole::Worker)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IpcError::ChannelNotFound(_)));
    }

    #[tokio::test]
    async fn test_open_close_reopen_same_handle() {
        let root = TempDir::new().unwrap();
        let handle = handle("abc123");
        let _coordinator = FileChannel::open(root.path(), &handle, ChannelRole::Coordinator)
            .await
            .unwrap();

        let first = FileChannel::open(root.path(), &handle, ChannelRole::Worker).await.unwrap();
        first.close().await.unwrap();
        // Closing twice is harmless
        first.close().await.unwrap();

        let second = FileChannel::open(root.path(), &handle, ChannelRole::Worker).await.unwrap();
        assert_eq!(second.handle(), &handle);
        assert!(FileChannel::exists(root.path(), &handle).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_messages_arrive_in_send_order() {
        let root = TempDir::new().unwrap();
        let handle = handle("ordered");
        let coordinator = FileChannel::open(root.path(), &handle, ChannelRole::Coordinator)
            .await
            .unwrap();
        let worker = FileChannel::open(root.path(), &handle, ChannelRole::Worker).await.unwrap();

        for i in 0..12 {
            coordinator
                .send(&MessageEnvelope::new(WorkerMessage::Cancel { reason: Some(i.to_string()) }))
                .await
                .unwrap();
        }

        for i in 0..12 {
            let envelope: MessageEnvelope<WorkerMessage> = worker.receive().await.unwrap();
            match envelope.message {
                WorkerMessage::Cancel { reason } => assert_eq!(reason, Some(i.to_string())),
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_receive_wakes_for_late_message() {
        let root = TempDir::new().unwrap();
        let handle = handle("late");
        let coordinator = FileChannel::open(root.path(), &handle, ChannelRole::Coordinator)
            .await
            .unwrap();
        let worker = Arc::new(FileChannel::open(root.path(), &handle, ChannelRole::Worker).await.unwrap());

        let reader = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.receive::<WorkerMessage>().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator
            .send(&MessageEnvelope::new(WorkerMessage::Shutdown))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(received.message, WorkerMessage::Shutdown));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_unblocks_pending_receive() {
        let root = TempDir::new().unwrap();
        let handle = handle("unblock");
        let _coordinator = FileChannel::open(root.path(), &handle, ChannelRole::Coordinator)
            .await
            .unwrap();
        let worker = Arc::new(
            FileChannel::open(root.path(), &handle, ChannelRole::Worker)
                .await
                .unwrap()
                .with_poll_interval(Duration::from_secs(30)),
        );

        let reader = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.receive::<WorkerMessage>().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), reader).await.unwrap().unwrap();
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_destroyed_channel_reports_closed() {
        let root = TempDir::new().unwrap();
        let handle = handle("gone");
        let coordinator = FileChannel::open(root.path(), &handle, ChannelRole::Coordinator)
            .await
            .unwrap();
        let worker = FileChannel::open(root.path(), &handle, ChannelRole::Worker).await.unwrap();

        assert!(worker.destroy().await.is_err());
        coordinator.destroy().await.unwrap();
        assert!(!FileChannel::exists(root.path(), &handle).await);

        let err = worker.receive::<WorkerMessage>().await.unwrap_err();
        assert!(matches!(err, IpcError::ConnectionClosed));

        let err = worker
            .send(&MessageEnvelope::new(CoordinatorMessage::Complete {
                summary: ExecutionSummary::new("doc"),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_temp_files_are_ignored() {
        let root = TempDir::new().unwrap();
        let handle = handle("partial");
        let coordinator = FileChannel::open(root.path(), &handle, ChannelRole::Coordinator)
            .await
            .unwrap();
        let worker = FileChannel::open(root.path(), &handle, ChannelRole::Worker).await.unwrap();

        let inbox = coordinator.channel_dir().join(TO_WORKER_DIR);
        std::fs::write(inbox.join(".00000000000000000000-0000000000.msg.tmp"), "{").unwrap();
        coordinator
            .send(&MessageEnvelope::new(WorkerMessage::Shutdown))
            .await
            .unwrap();

        let received: MessageEnvelope<WorkerMessage> = worker.receive().await.unwrap();
        assert!(matches!(received.message, WorkerMessage::Shutdown));
    }
}
