//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::PathBuf;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Configuration of a single plugin invocation inside a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Unique id of this invocation within the document
    pub id: String,
    /// Registered plugin name used to look up the implementation
    pub name: String,
    /// Plugin-specific settings, passed through untouched
    #[serde(default)]
    pub configuration: JsonValue,
}

impl PluginConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, configuration: JsonValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            configuration,
        }
    }
}

/// Input/output settings shared by every plugin of a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoConfig {
    /// Working directory handed to plugins for scratch files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration_directory: Option<PathBuf>,
    /// Where plugins should upload or copy their full output, if anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
}

/// A document to execute: ordered plugin invocations plus shared I/O settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub document_id: String,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    #[serde(default)]
    pub io_config: IoConfig,
    /// Optional execution timeout; can only shorten the worker's own deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl DocumentRequest {
    pub fn new(document_id: impl Into<String>, plugins: Vec<PluginConfig>) -> Self {
        Self {
            document_id: document_id.into(),
            plugins,
            io_config: IoConfig::default(),
            timeout_seconds: None,
        }
    }

    /// Check the request before anything runs: plugin ids must be unique
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for plugin in &self.plugins {
            if plugin.id.is_empty() {
                return Err(format!("plugin '{}' has an empty id", plugin.name));
            }
            if !seen.insert(plugin.id.as_str()) {
                return Err(format!("duplicate plugin id '{}'", plugin.id));
            }
        }
        Ok(())
    }
}

/// Outcome of a single plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginStatus::Success => write!(f, "success"),
            PluginStatus::Failed => write!(f, "failed"),
            PluginStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a single plugin, streamed back as soon as it is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResult {
    pub plugin_id: String,
    pub plugin_name: String,
    pub status: PluginStatus,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl PluginResult {
    fn build(
        plugin: &PluginConfig,
        status: PluginStatus,
        output: Option<JsonValue>,
        error: Option<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            plugin_id: plugin.id.clone(),
            plugin_name: plugin.name.clone(),
            status,
            output,
            error,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }

    /// Create a successful result
    pub fn success(
        plugin: &PluginConfig,
        output: JsonValue,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self::build(plugin, PluginStatus::Success, Some(output), None, started_at, completed_at)
    }

    /// Create a failed result
    pub fn failure(
        plugin: &PluginConfig,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self::build(plugin, PluginStatus::Failed, None, Some(error.into()), started_at, completed_at)
    }

    /// Create a cancelled result
    pub fn cancelled(
        plugin: &PluginConfig,
        reason: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self::build(plugin, PluginStatus::Cancelled, None, Some(reason.into()), started_at, completed_at)
    }

    pub fn is_success(&self) -> bool {
        self.status == PluginStatus::Success
    }
}

/// Overall outcome of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Success,
    Failed,
    Cancelled,
}

/// Totals sent with the terminal `Complete` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub document_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub status: DocumentStatus,
    /// Whether the deadline or a cancel request fired during execution
    pub cancellation_requested: bool,
}

impl ExecutionSummary {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            total: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            status: DocumentStatus::Success,
            cancellation_requested: false,
        }
    }

    /// Count one emitted result
    pub fn record(&mut self, status: PluginStatus) {
        self.total += 1;
        match status {
            PluginStatus::Success => self.succeeded += 1,
            PluginStatus::Failed => self.failed += 1,
            PluginStatus::Cancelled => self.cancelled += 1,
        }
        self.status = if self.cancelled > 0 {
            DocumentStatus::Cancelled
        } else if self.failed > 0 {
            DocumentStatus::Failed
        } else {
            DocumentStatus::Success
        };
    }
}

/// Messages sent from the coordinator to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Run a document; must be the first and only request
    ExecuteDocument { request: DocumentRequest },

    /// Stop starting new plugins and wind down running ones
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Coordinator is going away; handled like a cancel
    Shutdown,
}

/// Messages sent from a worker back to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// One plugin finished (in any status)
    PluginResult { result: PluginResult },

    /// Every plugin result has been sent; last message on the channel
    Complete { summary: ExecutionSummary },
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plugin(id: &str) -> PluginConfig {
        PluginConfig::new(id, "echo", json!({}))
    }

    #[test]
    fn test_plugin_result_constructors() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(1500);

        let ok = PluginResult::success(&plugin("a"), json!("ok"), start, end);
        assert!(ok.is_success());
        assert_eq!(ok.duration_ms, 1500);
        assert_eq!(ok.output, Some(json!("ok")));
        assert!(ok.error.is_none());

        let failed = PluginResult::failure(&plugin("b"), "boom", start, end);
        assert_eq!(failed.status, PluginStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.output.is_none());

        let cancelled = PluginResult::cancelled(&plugin("c"), "deadline", start, end);
        assert_eq!(cancelled.status, PluginStatus::Cancelled);
        assert_eq!(cancelled.plugin_name, "echo");
    }

    #[test]
    fn test_summary_status_precedence() {
        let mut summary = ExecutionSummary::new("doc");
        assert_eq!(summary.status, DocumentStatus::Success);

        summary.record(PluginStatus::Success);
        assert_eq!(summary.status, DocumentStatus::Success);

        summary.record(PluginStatus::Failed);
        assert_eq!(summary.status, DocumentStatus::Failed);

        summary.record(PluginStatus::Cancelled);
        assert_eq!(summary.status, DocumentStatus::Cancelled);
        assert_eq!((summary.total, summary.succeeded, summary.failed, summary.cancelled), (3, 1, 1, 1));
    }

    #[test]
    fn test_request_validation() {
        let ok = DocumentRequest::new("doc", vec![plugin("a"), plugin("b")]);
        assert!(ok.validate().is_ok());

        let dup = DocumentRequest::new("doc", vec![plugin("a"), plugin("a")]);
        assert!(dup.validate().unwrap_err().contains("duplicate"));

        let empty_id = DocumentRequest::new("doc", vec![plugin("")]);
        assert!(empty_id.validate().is_err());
    }

    #[test]
    fn test_worker_message_wire_format() {
        let raw = json!({
            "type": "execute_document",
            "request": {
                "document_id": "doc-1",
                "plugins": [{ "id": "A", "name": "echo", "configuration": { "message": "ok" } }]
            }
        });

        let message: WorkerMessage = serde_json::from_value(raw).unwrap();
        match message {
            WorkerMessage::ExecuteDocument { request } => {
                assert_eq!(request.document_id, "doc-1");
                assert_eq!(request.plugins.len(), 1);
                assert_eq!(request.io_config, IoConfig::default());
                assert_eq!(request.timeout_seconds, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let cancel: WorkerMessage = serde_json::from_value(json!({ "type": "cancel" })).unwrap();
        assert!(matches!(cancel, WorkerMessage::Cancel { reason: None }));
    }

    #[test]
    fn test_message_envelope() {
        let envelope = MessageEnvelope::new(WorkerMessage::Shutdown);
        assert_eq!(envelope.protocol_version, IPC_PROTOCOL_VERSION);
        assert!(envelope.is_compatible());

        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: MessageEnvelope<WorkerMessage> = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded.message, WorkerMessage::Shutdown));
    }
}
