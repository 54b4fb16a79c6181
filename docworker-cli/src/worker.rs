//! Worker run: open the channel, drive the pipeline, map the outcome

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn, Instrument};

use docworker_execution::{
    CancellationController, ExecutionBackend, MessagingPipeline, PipelineError, PipelineReport,
    PluginRegistry, PluginRunner, RunnerConfig,
};
use docworker_ipc::{ChannelHandle, ChannelRole, FileChannel, IpcError};

use crate::bootstrap::WorkerContext;

/// Process exit status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The request was processed and `Complete` was sent
    Completed,
    /// The channel broke or the coordinator violated the protocol
    ChannelFault,
    /// The worker never reached protocol I/O. Shares code 1 with channel
    /// faults; the log line tells them apart.
    StartupFailure,
}

impl WorkerExit {
    pub fn code(self) -> u8 {
        match self {
            WorkerExit::Completed => 0,
            WorkerExit::ChannelFault | WorkerExit::StartupFailure => 1,
        }
    }
}

impl From<WorkerExit> for ExitCode {
    fn from(exit: WorkerExit) -> Self {
        ExitCode::from(exit.code())
    }
}

/// Run one document to completion over the channel named `handle`
pub async fn run_worker(context: Arc<WorkerContext>, handle: ChannelHandle) -> WorkerExit {
    let span = context.span.clone();
    run(context, handle).instrument(span).await
}

async fn run(context: Arc<WorkerContext>, handle: ChannelHandle) -> WorkerExit {
    info!("document: {} worker started", handle);

    let channel_config = &context.config.channel;
    let channel = match FileChannel::open(&channel_config.root_dir, &handle, ChannelRole::Worker).await {
        Ok(channel) => Arc::new(channel.with_poll_interval(channel_config.poll_interval)),
        Err(e) => {
            error!("Failed to create channel {}: {}", handle, e);
            return WorkerExit::StartupFailure;
        }
    };

    let registry = Arc::new(PluginRegistry::with_builtin_plugins());
    let runner: Arc<dyn ExecutionBackend> = Arc::new(PluginRunner::new(
        registry,
        RunnerConfig::from(&context.config.execution),
    ));
    let controller = Arc::new(CancellationController::new());

    let signals = tokio::spawn(cancel_on_signal(Arc::clone(&controller)));

    let mut pipeline = MessagingPipeline::new(channel, runner, controller, context.deadline());
    let outcome = pipeline.run().await;
    signals.abort();

    exit_for(outcome)
}

fn exit_for(outcome: Result<PipelineReport, PipelineError>) -> WorkerExit {
    match outcome {
        Ok(report) => {
            if report.synthesized > 0 || report.discarded > 0 {
                warn!(
                    "Execution backend misbehaved: {} results synthesized, {} discarded",
                    report.synthesized, report.discarded
                );
            }
            info!("document worker closed");
            WorkerExit::Completed
        }
        Err(PipelineError::Channel(IpcError::ConnectionClosed)) => {
            error!("Coordinator went away before the document completed");
            WorkerExit::ChannelFault
        }
        Err(e) => {
            // Nothing can be reported once the channel is broken
            error!("messaging worker encountered error: {}", e);
            WorkerExit::ChannelFault
        }
    }
}

/// SIGINT and SIGTERM cancel the document instead of killing the worker
async fn cancel_on_signal(controller: Arc<CancellationController>) {
    match wait_for_signal().await {
        Ok(signal) => {
            warn!("Received {}, cancelling document", signal);
            controller.cancel_now();
        }
        Err(e) => warn!("Signal handling unavailable: {:#}", e),
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    Ok("Ctrl-C")
}
