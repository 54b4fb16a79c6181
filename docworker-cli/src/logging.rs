//! Tracing setup for the worker process

use docworker_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Initialize tracing for the worker (stderr only, the channel carries all protocol data).
///
/// Filter precedence: `--log-level`, then `RUST_LOG`, then the configured
/// level. Configured filter directives are appended in every case. Records
/// from crates using the `log` facade are forwarded into tracing.
pub fn init_worker_tracing(config: &LoggingConfig, log_level: Option<&str>) -> Result<(), String> {
    let env_filter = build_filter(config, log_level);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    result.map_err(|e| e.to_string())?;
    tracing::debug!("Worker tracing initialized");
    Ok(())
}

/// Best-effort stderr logging for failures that happen before configuration is known
pub fn init_fallback_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Already initialized is fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_filter(config: &LoggingConfig, log_level: Option<&str>) -> EnvFilter {
    let base = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to '{}'", level, config.level);
            EnvFilter::new(config.level.to_string())
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.to_string())),
    };

    let Some(extra) = config.filter.as_deref() else {
        return base;
    };

    let mut filter = base;
    for directive in extra.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid log filter directive '{}': {}", directive, e),
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use docworker_config::LogLevel;

    #[test]
    fn test_cli_level_wins() {
        temp_env::with_var("RUST_LOG", Some("trace"), || {
            let filter = build_filter(&LoggingConfig::default(), Some("warn"));
            assert_eq!(filter.to_string(), "warn");
        });
    }

    #[test]
    fn test_rust_log_before_config() {
        temp_env::with_var("RUST_LOG", Some("debug"), || {
            let filter = build_filter(&LoggingConfig::default(), None);
            assert_eq!(filter.to_string(), "debug");
        });
    }

    #[test]
    fn test_config_level_and_directives() {
        temp_env::with_var("RUST_LOG", None::<&str>, || {
            let config = LoggingConfig {
                level: LogLevel::Error,
                filter: Some("docworker_ipc=trace, docworker_execution=debug".to_string()),
                ..LoggingConfig::default()
            };
            let rendered = build_filter(&config, None).to_string();
            assert!(rendered.contains("error"));
            assert!(rendered.contains("docworker_ipc=trace"));
            assert!(rendered.contains("docworker_execution=debug"));
        });
    }
}
