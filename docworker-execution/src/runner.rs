//! In-process plugin runner

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn, Instrument};

use docworker_config::ExecutionConfig;
use docworker_ipc::{DocumentRequest, IoConfig, PluginConfig, PluginResult};
use serde_json::Value as JsonValue;

use crate::backend::{ExecutionBackend, ResultStream};
use crate::cancellation::CancelObserver;
use crate::error::{ExecutionError, PluginError};
use crate::plugin::PluginContext;
use crate::registry::PluginRegistry;

const NOT_STARTED: &str = "document cancelled before plugin started";
const STOPPED_ON_CANCEL: &str = "plugin stopped after cancellation";

/// Plugin runner settings
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Plugins running at once; 1 runs them in request order
    pub max_concurrent_plugins: usize,
    /// Time a running plugin gets to stop after cancellation before it is abandoned
    pub cancel_grace_period: Duration,
    /// Results buffered ahead of the consumer
    pub result_buffer_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for RunnerConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_concurrent_plugins: config.max_concurrent_plugins,
            cancel_grace_period: config.cancel_grace_period,
            result_buffer_size: config.result_buffer_size,
        }
    }
}

/// Runs request plugins as tokio tasks against a [`PluginRegistry`].
///
/// Each plugin runs in its own task, so a panicking plugin is reported as a
/// failed result instead of taking the worker down.
#[derive(Debug, Clone)]
pub struct PluginRunner {
    registry: Arc<PluginRegistry>,
    config: RunnerConfig,
}

impl PluginRunner {
    pub fn new(registry: Arc<PluginRegistry>, mut config: RunnerConfig) -> Self {
        config.max_concurrent_plugins = config.max_concurrent_plugins.max(1);
        config.result_buffer_size = config.result_buffer_size.max(1);
        Self { registry, config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }
}

impl ExecutionBackend for PluginRunner {
    fn run(&self, request: &DocumentRequest, observer: CancelObserver) -> ResultStream {
        let (tx, rx) = mpsc::channel(self.config.result_buffer_size);
        let run = Arc::new(DocumentRun {
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            document_id: request.document_id.clone(),
            io_config: request.io_config.clone(),
            observer,
        });

        let span = tracing::info_span!("document", document_id = %request.document_id);
        tokio::spawn(run.drive(request.plugins.clone(), tx).instrument(span));

        ReceiverStream::new(rx).boxed()
    }
}

type ResultSender = mpsc::Sender<Result<PluginResult, ExecutionError>>;

/// State shared by all plugin tasks of one document
struct DocumentRun {
    registry: Arc<PluginRegistry>,
    config: RunnerConfig,
    document_id: String,
    io_config: IoConfig,
    observer: CancelObserver,
}

impl DocumentRun {
    async fn drive(self: Arc<Self>, plugins: Vec<PluginConfig>, tx: ResultSender) {
        info!(
            "Executing {} plugins (max {} concurrent)",
            plugins.len(),
            self.config.max_concurrent_plugins
        );

        let mut pending = plugins.into_iter();
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < self.config.max_concurrent_plugins && !self.observer.is_cancelled() {
                let Some(plugin) = pending.next() else { break };
                let run = Arc::clone(&self);
                in_flight.spawn(
                    async move { run.execute_plugin(plugin).await }.instrument(tracing::Span::current()),
                );
            }

            // Empty here means nothing left to start, or cancellation stopped new starts
            let Some(joined) = in_flight.join_next().await else { break };
            let item = joined.map_err(|e| ExecutionError::TaskFailed(e.to_string()));
            if tx.send(item).await.is_err() {
                debug!("Result receiver dropped, abandoning document run");
                in_flight.abort_all();
                return;
            }
        }

        let mut skipped = 0usize;
        for plugin in pending {
            let now = Utc::now();
            if tx.send(Ok(PluginResult::cancelled(&plugin, NOT_STARTED, now, now))).await.is_err() {
                return;
            }
            skipped += 1;
        }
        if skipped > 0 {
            info!("{} plugins not started due to cancellation", skipped);
        }

        debug!("Document run finished");
    }

    async fn execute_plugin(&self, plugin: PluginConfig) -> PluginResult {
        let started_at = Utc::now();

        if self.observer.is_cancelled() {
            return PluginResult::cancelled(&plugin, NOT_STARTED, started_at, started_at);
        }

        let Some(implementation) = self.registry.get(&plugin.name) else {
            warn!("Plugin '{}' requested by {} is not registered", plugin.name, plugin.id);
            return PluginResult::failure(
                &plugin,
                format!("plugin '{}' is not registered", plugin.name),
                started_at,
                Utc::now(),
            );
        };

        if let Err(e) = implementation.validate_config(&plugin.configuration) {
            warn!("Plugin {} rejected its configuration: {}", plugin.id, e);
            return PluginResult::failure(&plugin, e.to_string(), started_at, Utc::now());
        }

        let context = PluginContext::new(
            self.document_id.clone(),
            &plugin,
            self.io_config.clone(),
            self.observer.clone(),
        );

        debug!("Starting plugin {} ({})", plugin.id, plugin.name);
        let mut task = tokio::spawn(async move { implementation.execute(context).await });

        let joined = tokio::select! {
            joined = &mut task => Some(joined),
            _ = self.observer.cancelled() => None,
        };
        let Some(joined) = joined else {
            return self.wind_down(&plugin, task, started_at).await;
        };

        let completed_at = Utc::now();
        let result = match joined {
            Ok(Ok(output)) => PluginResult::success(&plugin, output, started_at, completed_at),
            Ok(Err(PluginError::Cancelled)) => {
                PluginResult::cancelled(&plugin, STOPPED_ON_CANCEL, started_at, completed_at)
            }
            Ok(Err(e)) => PluginResult::failure(&plugin, e.to_string(), started_at, completed_at),
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                warn!("Plugin {} panicked: {}", plugin.id, message);
                PluginResult::failure(&plugin, format!("plugin panicked: {}", message), started_at, completed_at)
            }
            Err(e) => PluginResult::failure(&plugin, format!("plugin task failed: {}", e), started_at, completed_at),
        };

        debug!("Plugin {} finished with status {}", plugin.id, result.status);
        result
    }

    /// Give a running plugin the grace period to stop, then abandon it.
    ///
    /// Whatever the plugin produces after cancellation, it is reported as
    /// cancelled.
    async fn wind_down(
        &self,
        plugin: &PluginConfig,
        mut task: JoinHandle<Result<JsonValue, PluginError>>,
        started_at: DateTime<Utc>,
    ) -> PluginResult {
        let grace = self.config.cancel_grace_period;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => {
                debug!("Plugin {} stopped within the grace period", plugin.id);
                PluginResult::cancelled(plugin, STOPPED_ON_CANCEL, started_at, Utc::now())
            }
            Err(_) => {
                task.abort();
                warn!("Plugin {} did not stop within {:?}, abandoning it", plugin.id, grace);
                PluginResult::cancelled(
                    plugin,
                    format!("plugin did not stop within the {:?} grace period", grace),
                    started_at,
                    Utc::now(),
                )
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
