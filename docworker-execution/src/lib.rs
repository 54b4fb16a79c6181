//! Document execution for the worker process
//!
//! This crate holds everything between a decoded request and the results on
//! the wire: the cancellation latch, the plugin contract and registry, the
//! in-process plugin runner and the messaging pipeline that ties them to an
//! IPC channel.

pub mod backend;
pub mod cancellation;
pub mod error;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use backend::{ExecutionBackend, ResultStream};
pub use cancellation::{CancelObserver, CancelTrigger, CancellationController};
pub use error::{ExecutionError, PipelineError, PluginError};
pub use pipeline::{
    MessagingPipeline, PipelineReport, PipelineState, ResultLedger, MISSING_RESULT_ERROR,
};
pub use plugin::{Plugin, PluginContext};
pub use plugins::{EchoPlugin, SleepPlugin};
pub use registry::PluginRegistry;
pub use runner::{PluginRunner, RunnerConfig};
