//! CLI argument parsing definitions

use clap::Parser;
use docworker_ipc::ChannelHandle;
use std::path::PathBuf;

/// Runs one document handed over by a coordinator process.
///
/// The coordinator creates the channel and passes its handle as the only
/// positional argument. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "docworker", author, version, about, long_about = None)]
pub struct Cli {
    /// Channel handle created by the coordinator
    #[arg(value_name = "CHANNEL")]
    pub channel: ChannelHandle,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Set the log level or filter (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}
