//! One-shot worker startup.
//!
//! Keep this light: no channel I/O and nothing slow happens before the
//! coordinator's request arrives.

use std::ffi::OsString;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use docworker_config::{ConfigError, ConfigLoader, WorkerConfig, MAX_COMMAND_TIMEOUT};
use docworker_ipc::ChannelHandle;

use crate::cli::Cli;
use crate::identity::{AgentIdentity, ChainSelector, IdentityError, IdentitySelector};
use crate::logging::init_worker_tracing;

/// Context label every worker log line carries
pub const WORKER_CONTEXT_NAME: &str = "[document-worker]";

/// Startup failures. All are fatal and happen before any channel I/O.
#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("{0}")]
    Argument(#[from] clap::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity resolution failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

impl InitializationError {
    /// Whether tracing was installed before the failure
    pub fn logging_ready(&self) -> bool {
        matches!(self, InitializationError::Identity(_))
    }
}

/// Resolved identity, configuration and log context, shared read-only
#[derive(Debug)]
pub struct WorkerContext {
    pub identity: AgentIdentity,
    pub config: WorkerConfig,
    /// Span every protocol event is recorded in
    pub span: tracing::Span,
    pub started_at: Instant,
}

impl WorkerContext {
    pub fn new(identity: AgentIdentity, config: WorkerConfig, handle: &ChannelHandle, started_at: Instant) -> Self {
        let span = tracing::info_span!(
            "worker",
            worker = WORKER_CONTEXT_NAME,
            channel = %handle,
            instance_id = %identity.instance_id,
        );
        Self {
            identity,
            config,
            span,
            started_at,
        }
    }

    /// Hard execution deadline: worker start plus the command timeout,
    /// clamped to [`MAX_COMMAND_TIMEOUT`] for configurations built without validation
    pub fn deadline(&self) -> Instant {
        let timeout = self.config.execution.command_timeout.min(MAX_COMMAND_TIMEOUT);
        self.started_at.checked_add(timeout).unwrap_or(self.started_at)
    }
}

/// Parse arguments, load configuration, set up tracing and resolve identity
pub fn initialize<I, T>(args: I) -> Result<(Arc<WorkerContext>, ChannelHandle), InitializationError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let started_at = Instant::now();
    let cli = Cli::try_parse_from(args)?;

    let config = load_config(&cli)?;
    init_worker_tracing(&config.logging, cli.log_level.as_deref())
        .map_err(InitializationError::Logging)?;

    info!("docworker - {}", env!("CARGO_PKG_VERSION"));

    let selector = ChainSelector::from_config(&config.identity);
    let context = initialize_with(selector, config, &cli.channel, started_at)?;
    Ok((Arc::new(context), cli.channel))
}

/// Resolve identity with an explicit selector and build the context
pub fn initialize_with(
    selector: impl IdentitySelector,
    config: WorkerConfig,
    handle: &ChannelHandle,
    started_at: Instant,
) -> Result<WorkerContext, InitializationError> {
    let identity = selector.resolve()?;
    info!(
        "Using channel {}, instance id {}",
        handle, identity.instance_id
    );
    Ok(WorkerContext::new(identity, config, handle, started_at))
}

fn load_config(cli: &Cli) -> Result<WorkerConfig, ConfigError> {
    ConfigLoader::new().load(cli.config.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedSelector(Option<&'static str>);

    impl IdentitySelector for FixedSelector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn resolve(&self) -> Result<AgentIdentity, IdentityError> {
            self.0.map(AgentIdentity::new).ok_or(IdentityError::Unavailable {
                source_name: "fixed",
                reason: "metadata endpoint unreachable".to_string(),
            })
        }
    }

    #[test]
    fn test_initialize_with_selector() {
        let handle = ChannelHandle::new("doc-1").unwrap();
        let mut config = WorkerConfig::default();
        config.execution.command_timeout = Duration::from_secs(60);
        let started_at = Instant::now();

        let context = initialize_with(FixedSelector(Some("i-123")), config, &handle, started_at).unwrap();
        assert_eq!(context.identity.instance_id, "i-123");
        assert_eq!(context.deadline(), started_at + Duration::from_secs(60));
    }

    #[test]
    fn test_deadline_is_clamped() {
        let handle = ChannelHandle::new("doc-1").unwrap();
        let mut config = WorkerConfig::default();
        config.execution.command_timeout = Duration::MAX;
        let started_at = Instant::now();

        let context = initialize_with(FixedSelector(Some("i-123")), config, &handle, started_at).unwrap();
        assert_eq!(context.deadline(), started_at + MAX_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_oversized_command_timeout_is_config_error() {
        temp_env::with_vars(
            [
                ("DOCWORKER_COMMAND_TIMEOUT_SECONDS", Some("18446744073709551615")),
                ("DOCWORKER_IDENTITY_SOURCES", Some("environment")),
                ("DOCWORKER_INSTANCE_ID", Some("i-123")),
            ],
            || {
                let err = initialize(["docworker", "doc-1"]).unwrap_err();
                assert!(matches!(err, InitializationError::Config(ConfigError::DomainError { .. })));
            },
        );
    }

    #[test]
    fn test_identity_failure_is_initialization_error() {
        let handle = ChannelHandle::new("doc-1").unwrap();
        let err = initialize_with(FixedSelector(None), WorkerConfig::default(), &handle, Instant::now())
            .unwrap_err();
        assert!(matches!(err, InitializationError::Identity(_)));
        assert!(err.logging_ready());
    }

    #[test]
    fn test_argument_errors() {
        let err = initialize(["docworker"]).unwrap_err();
        assert!(matches!(err, InitializationError::Argument(_)));

        let err = initialize(["docworker", "bad/handle"]).unwrap_err();
        assert!(matches!(err, InitializationError::Argument(_)));
        assert!(!err.logging_ready());
    }

    #[test]
    fn test_invalid_config_file_is_fatal() {
        let err = initialize(["docworker", "--config", "/definitely/not/here.yaml", "doc-1"]).unwrap_err();
        assert!(matches!(err, InitializationError::Config(ConfigError::FileReadError(_))));
    }
}
