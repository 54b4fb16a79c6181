//! Built-in plugins.
//!
//! `echo` returns its configuration and `sleep` waits for a configured
//! duration while honouring cancellation. Both are used for smoke tests
//! and coordinator integration checks.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::Instrument;

use crate::error::PluginError;
use crate::plugin::{Plugin, PluginContext};

/// Returns `configuration.message` if present, the whole configuration otherwise
#[derive(Debug, Default)]
pub struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, context: PluginContext) -> Result<JsonValue, PluginError> {
        tracing::debug!(
            parent: &context.span,
            "Echoing configuration for document {}",
            context.document_id
        );

        Ok(match context.configuration.get("message") {
            Some(message) => message.clone(),
            None => context.configuration.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SleepSettings {
    #[serde(default)]
    millis: Option<u64>,
    #[serde(default)]
    seconds: Option<f64>,
}

impl SleepSettings {
    fn duration(&self) -> Result<Duration, PluginError> {
        match (self.millis, self.seconds) {
            (Some(millis), None) => Ok(Duration::from_millis(millis)),
            (None, Some(seconds)) => Duration::try_from_secs_f64(seconds).map_err(|e| {
                PluginError::InvalidConfiguration(format!(
                    "seconds must be a non-negative number, got {}: {}",
                    seconds, e
                ))
            }),
            (Some(_), Some(_)) => Err(PluginError::InvalidConfiguration(
                "set either millis or seconds, not both".to_string(),
            )),
            (None, None) => Err(PluginError::InvalidConfiguration(
                "one of millis or seconds is required".to_string(),
            )),
        }
    }
}

/// Sleeps for `millis` or `seconds`, stopping early on cancellation
#[derive(Debug, Default)]
pub struct SleepPlugin;

#[async_trait]
impl Plugin for SleepPlugin {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, context: PluginContext) -> Result<JsonValue, PluginError> {
        let settings: SleepSettings = context.config_as()?;
        let duration = settings.duration()?;
        let span = context.span.clone();

        async move {
            tracing::debug!("Sleeping for {:?}", duration);
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    Ok(json!({ "slept_ms": duration.as_millis() as u64 }))
                }
                _ = context.cancel.cancelled() => {
                    tracing::debug!("Sleep interrupted by cancellation");
                    Err(PluginError::Cancelled)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), PluginError> {
        let settings: SleepSettings = serde_json::from_value(config.clone())
            .map_err(|e| PluginError::InvalidConfiguration(e.to_string()))?;
        settings.duration().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationController;
    use docworker_ipc::{IoConfig, PluginConfig};

    fn context(controller: &CancellationController, name: &str, config: JsonValue) -> PluginContext {
        let plugin = PluginConfig::new("p1", name, config);
        PluginContext::new("doc-1", &plugin, IoConfig::default(), controller.observer())
    }

    #[tokio::test]
    async fn test_echo_returns_message() {
        let controller = CancellationController::new();
        let output = EchoPlugin
            .execute(context(&controller, "echo", json!({"message": "hello"})))
            .await
            .unwrap();
        assert_eq!(output, json!("hello"));

        let output = EchoPlugin
            .execute(context(&controller, "echo", json!({"pages": 3})))
            .await
            .unwrap();
        assert_eq!(output, json!({"pages": 3}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let controller = CancellationController::new();
        let output = SleepPlugin
            .execute(context(&controller, "sleep", json!({"millis": 250})))
            .await
            .unwrap();
        assert_eq!(output, json!({"slept_ms": 250}));
    }

    #[tokio::test]
    async fn test_sleep_stops_on_cancel() {
        let controller = CancellationController::new();
        let ctx = context(&controller, "sleep", json!({"seconds": 3600}));
        let handle = tokio::spawn(async move { SleepPlugin.execute(ctx).await });

        controller.cancel_now();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sleep should stop")
            .unwrap();
        assert!(matches!(outcome, Err(PluginError::Cancelled)));
    }

    #[test]
    fn test_sleep_config_validation() {
        assert!(SleepPlugin.validate_config(&json!({"millis": 10})).is_ok());
        assert!(SleepPlugin.validate_config(&json!({"seconds": 1.5})).is_ok());
        assert!(SleepPlugin.validate_config(&json!({})).is_err());
        assert!(SleepPlugin.validate_config(&json!({"millis": 1, "seconds": 1.0})).is_err());
        assert!(SleepPlugin.validate_config(&json!({"seconds": -1.0})).is_err());
        assert!(matches!(
            SleepPlugin.validate_config(&json!({"seconds": 1e20})),
            Err(PluginError::InvalidConfiguration(_))
        ));
    }
}
