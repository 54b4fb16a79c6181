//! Isolated document worker
//!
//! A coordinator launches `docworker <CHANNEL>` for every document. The
//! worker resolves its identity and configuration, opens the channel the
//! coordinator created, executes the single request it receives and streams
//! the plugin results back before exiting.

pub mod bootstrap;
pub mod cli;
pub mod identity;
pub mod logging;
pub mod worker;

pub use bootstrap::{initialize, initialize_with, InitializationError, WorkerContext, WORKER_CONTEXT_NAME};
pub use cli::Cli;
pub use identity::{
    AgentIdentity, ChainSelector, EnvironmentSelector, IdentityError, IdentitySelector,
    RuntimeConfigSelector,
};
pub use worker::{run_worker, WorkerExit};
