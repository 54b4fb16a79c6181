//! Worker messaging pipeline.
//!
//! Drives one document through the channel:
//!
//! ```text
//! AwaitingRequest -> Executing -> Draining -> Complete
//!        \               \            \
//!         +---------------+------------+--> Failed
//! ```
//!
//! The worker receives exactly one `ExecuteDocument`, streams one
//! `PluginResult` per requested plugin as results arrive, then sends a single
//! `Complete`. While draining, a listener task keeps reading the channel so a
//! coordinator `Cancel` or `Shutdown` can fire the cancellation latch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use docworker_ipc::{
    CoordinatorMessage, DocumentRequest, ExecutionSummary, IpcChannel, MessageEnvelope,
    PluginConfig, PluginResult, WorkerMessage,
};

use crate::backend::{ExecutionBackend, ResultStream};
use crate::cancellation::CancellationController;
use crate::error::PipelineError;

/// Error text of results the worker had to fill in itself
pub const MISSING_RESULT_ERROR: &str = "no result produced by execution backend";

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    AwaitingRequest,
    Executing,
    Draining,
    Complete,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::AwaitingRequest => "awaiting_request",
            PipelineState::Executing => "executing",
            PipelineState::Draining => "draining",
            PipelineState::Complete => "complete",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks which requested plugins already have a result on the wire
#[derive(Debug)]
pub struct ResultLedger {
    expected: Vec<PluginConfig>,
    emitted: HashSet<String>,
    summary: ExecutionSummary,
}

impl ResultLedger {
    pub fn new(request: &DocumentRequest) -> Self {
        Self {
            expected: request.plugins.clone(),
            emitted: HashSet::with_capacity(request.plugins.len()),
            summary: ExecutionSummary::new(request.document_id.clone()),
        }
    }

    /// Record a result; false if its id is unknown or already emitted
    pub fn accept(&mut self, result: &PluginResult) -> bool {
        let known = self.expected.iter().any(|plugin| plugin.id == result.plugin_id);
        if !known || !self.emitted.insert(result.plugin_id.clone()) {
            return false;
        }
        self.summary.record(result.status);
        true
    }

    /// Requested plugins without a result, in request order
    pub fn missing(&self) -> Vec<PluginConfig> {
        self.expected
            .iter()
            .filter(|plugin| !self.emitted.contains(&plugin.id))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.emitted.len() == self.expected.len()
    }

    pub fn emitted(&self) -> usize {
        self.emitted.len()
    }

    pub fn summary(&self) -> &ExecutionSummary {
        &self.summary
    }
}

/// What a completed pipeline run did
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Summary sent with `Complete`
    pub summary: ExecutionSummary,
    /// Results the worker had to synthesize because the backend never produced them
    pub synthesized: usize,
    /// Items the backend yielded that were dropped (errors, unknown or duplicate ids)
    pub discarded: usize,
}

/// Single-document request/response driver over an [`IpcChannel`]
pub struct MessagingPipeline<C: IpcChannel + 'static> {
    channel: Arc<C>,
    backend: Arc<dyn ExecutionBackend>,
    controller: Arc<CancellationController>,
    deadline: Instant,
    state: PipelineState,
}

impl<C: IpcChannel + 'static> MessagingPipeline<C> {
    /// `deadline` is the absolute point at which execution is cancelled,
    /// normally worker start plus the command timeout.
    pub fn new(
        channel: Arc<C>,
        backend: Arc<dyn ExecutionBackend>,
        controller: Arc<CancellationController>,
        deadline: Instant,
    ) -> Self {
        Self {
            channel,
            backend,
            controller,
            deadline,
            state: PipelineState::AwaitingRequest,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the pipeline to `Complete` or `Failed`.
    ///
    /// On `Ok` the `Complete` message was sent. On `Err` the worker must exit
    /// with failure; no further sends are attempted.
    pub async fn run(&mut self) -> Result<PipelineReport, PipelineError> {
        let outcome = self.run_to_completion().await;
        self.controller.disarm();

        match &outcome {
            Ok(report) => {
                self.transition(PipelineState::Complete);
                info!(
                    "Document {} complete: {} succeeded, {} failed, {} cancelled",
                    report.summary.document_id,
                    report.summary.succeeded,
                    report.summary.failed,
                    report.summary.cancelled
                );
            }
            Err(e) => {
                self.transition(PipelineState::Failed);
                error!("Messaging pipeline failed: {}", e);
            }
        }

        if let Err(e) = self.channel.close().await {
            debug!("Closing channel after pipeline run failed: {}", e);
        }

        outcome
    }

    async fn run_to_completion(&mut self) -> Result<PipelineReport, PipelineError> {
        let request = self.await_request().await?;

        self.transition(PipelineState::Executing);
        let deadline = self.effective_deadline(&request);
        let observer = self.controller.arm(deadline);

        let (fault_tx, fault_rx) = mpsc::channel(1);
        let listener = tokio::spawn(listen_for_cancellation(
            Arc::clone(&self.channel),
            Arc::clone(&self.controller),
            fault_tx,
        ));

        let results = self.backend.run(&request, observer);

        self.transition(PipelineState::Draining);
        let mut ledger = ResultLedger::new(&request);
        let drained = self.drain(results, &mut ledger, fault_rx).await;
        listener.abort();
        let discarded = drained?;

        let missing = if ledger.is_complete() { Vec::new() } else { ledger.missing() };
        if !missing.is_empty() {
            warn!(
                "Execution backend produced no result for {} plugins, reporting them as failed",
                missing.len()
            );
        }
        for plugin in &missing {
            let now = Utc::now();
            let result = PluginResult::failure(plugin, MISSING_RESULT_ERROR, now, now);
            ledger.accept(&result);
            self.send_result(result).await?;
        }

        let mut summary = ledger.summary().clone();
        summary.cancellation_requested = self.controller.is_cancelled();

        self.channel
            .send(&MessageEnvelope::new(CoordinatorMessage::Complete {
                summary: summary.clone(),
            }))
            .await?;

        Ok(PipelineReport {
            summary,
            synthesized: missing.len(),
            discarded,
        })
    }

    async fn await_request(&mut self) -> Result<DocumentRequest, PipelineError> {
        debug!("Waiting for execute request");
        let envelope: MessageEnvelope<WorkerMessage> = self.channel.receive().await?;

        let request = match envelope.message {
            WorkerMessage::ExecuteDocument { request } => request,
            other => {
                return Err(PipelineError::ProtocolViolation(format!(
                    "expected execute_document as the first message, got {}",
                    message_kind(&other)
                )));
            }
        };

        request.validate().map_err(PipelineError::ProtocolViolation)?;
        info!(
            "Received document {} with {} plugins",
            request.document_id,
            request.plugins.len()
        );
        Ok(request)
    }

    /// Forward backend results until the stream ends or the listener reports a fault.
    ///
    /// Returns how many backend items were dropped.
    async fn drain(
        &self,
        mut results: ResultStream,
        ledger: &mut ResultLedger,
        mut faults: mpsc::Receiver<PipelineError>,
    ) -> Result<usize, PipelineError> {
        let mut listening = true;
        let mut discarded = 0usize;

        loop {
            tokio::select! {
                biased;

                fault = faults.recv(), if listening => match fault {
                    Some(fault) => return Err(fault),
                    None => listening = false,
                },

                item = results.next() => match item {
                    Some(Ok(result)) => {
                        if ledger.accept(&result) {
                            self.send_result(result).await?;
                        } else {
                            warn!(
                                "Dropping result for unknown or already reported plugin {}",
                                result.plugin_id
                            );
                            discarded += 1;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Execution backend error: {}", e);
                        discarded += 1;
                    }
                    None => {
                        debug!("Result stream ended after {} results", ledger.emitted());
                        return Ok(discarded);
                    }
                },
            }
        }
    }

    async fn send_result(&self, result: PluginResult) -> Result<(), PipelineError> {
        debug!("Sending result for plugin {} ({})", result.plugin_id, result.status);
        self.channel
            .send(&MessageEnvelope::new(CoordinatorMessage::PluginResult { result }))
            .await
            .map_err(PipelineError::from)
    }

    fn effective_deadline(&self, request: &DocumentRequest) -> Instant {
        // A timeout too large to represent cannot be earlier than the worker deadline
        request
            .timeout_seconds
            .and_then(|seconds| Instant::now().checked_add(Duration::from_secs(seconds)))
            .map_or(self.deadline, |requested| self.deadline.min(requested))
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline state {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Read coordinator messages during execution.
///
/// `Cancel` and `Shutdown` fire the latch. The counterpart closing its end
/// only stops listening; any other error or a second `ExecuteDocument` is
/// reported as a fault.
async fn listen_for_cancellation<C: IpcChannel + 'static>(
    channel: Arc<C>,
    controller: Arc<CancellationController>,
    faults: mpsc::Sender<PipelineError>,
) {
    loop {
        match channel.receive::<WorkerMessage>().await {
            Ok(envelope) => match envelope.message {
                WorkerMessage::Cancel { reason } => {
                    info!(
                        "Coordinator requested cancellation: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    controller.cancel_now();
                }
                WorkerMessage::Shutdown => {
                    info!("Coordinator is shutting down, cancelling document");
                    controller.cancel_now();
                }
                WorkerMessage::ExecuteDocument { .. } => {
                    let _ = faults
                        .send(PipelineError::ProtocolViolation(
                            "duplicate execute_document request".to_string(),
                        ))
                        .await;
                    return;
                }
            },
            Err(e) if e.is_disconnect() => {
                debug!("Coordinator closed its end, no more cancel requests");
                return;
            }
            Err(e) => {
                let _ = faults.send(PipelineError::from(e)).await;
                return;
            }
        }
    }
}

fn message_kind(message: &WorkerMessage) -> &'static str {
    match message {
        WorkerMessage::ExecuteDocument { .. } => "execute_document",
        WorkerMessage::Cancel { .. } => "cancel",
        WorkerMessage::Shutdown => "shutdown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docworker_ipc::DocumentStatus;
    use serde_json::json;

    fn request() -> DocumentRequest {
        DocumentRequest::new(
            "doc-1",
            vec![
                PluginConfig::new("a", "echo", json!({})),
                PluginConfig::new("b", "echo", json!({})),
            ],
        )
    }

    #[test]
    fn test_ledger_counts_each_id_once() {
        let request = request();
        let mut ledger = ResultLedger::new(&request);
        let now = Utc::now();

        let a = PluginResult::success(&request.plugins[0], json!(1), now, now);
        assert!(ledger.accept(&a));
        assert!(!ledger.accept(&a));

        let stranger = PluginResult::success(&PluginConfig::new("z", "echo", json!({})), json!(1), now, now);
        assert!(!ledger.accept(&stranger));

        assert!(!ledger.is_complete());
        assert_eq!(ledger.missing(), vec![request.plugins[1].clone()]);

        let b = PluginResult::cancelled(&request.plugins[1], "stopped", now, now);
        assert!(ledger.accept(&b));
        assert!(ledger.is_complete());
        assert!(ledger.missing().is_empty());

        let summary = ledger.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.status, DocumentStatus::Cancelled);
    }

    #[test]
    fn test_empty_ledger_is_complete() {
        let ledger = ResultLedger::new(&DocumentRequest::new("empty", vec![]));
        assert!(ledger.is_complete());
        assert_eq!(ledger.emitted(), 0);
        assert_eq!(ledger.summary().status, DocumentStatus::Success);
    }
}
