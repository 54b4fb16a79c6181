//! Execution backend seam

use futures::stream::BoxStream;

use docworker_ipc::{DocumentRequest, PluginResult};

use crate::cancellation::CancelObserver;
use crate::error::ExecutionError;

/// Stream of plugin results in completion order.
///
/// An `Err` item is a backend fault, not a plugin failure; the pipeline logs
/// it and keeps draining.
pub type ResultStream = BoxStream<'static, Result<PluginResult, ExecutionError>>;

/// Strategy that turns a document request into plugin results.
///
/// Contract:
/// - at most one result per requested plugin id
/// - after the observer reports cancellation, no plugin that has not started
///   may start; it is reported `cancelled` instead
/// - the stream ends once every result has been produced
pub trait ExecutionBackend: Send + Sync {
    /// Start executing `request`. Must be called from within a tokio runtime.
    fn run(&self, request: &DocumentRequest, observer: CancelObserver) -> ResultStream;
}
