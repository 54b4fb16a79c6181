//! Plugin contract

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use docworker_ipc::{IoConfig, PluginConfig};

use crate::cancellation::CancelObserver;
use crate::error::PluginError;

/// Everything a plugin gets to see while it runs
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Request-local plugin id
    pub plugin_id: String,
    pub document_id: String,
    /// Plugin-specific configuration from the request
    pub configuration: JsonValue,
    pub io_config: IoConfig,
    /// Cooperative cancellation signal for long-running plugins
    pub cancel: CancelObserver,
    /// Span the plugin's own logs should be recorded in
    pub span: tracing::Span,
}

impl PluginContext {
    pub fn new(
        document_id: impl Into<String>,
        plugin: &PluginConfig,
        io_config: IoConfig,
        cancel: CancelObserver,
    ) -> Self {
        let document_id = document_id.into();
        let span = tracing::info_span!(
            "plugin",
            plugin_id = %plugin.id,
            plugin_name = %plugin.name,
        );
        Self {
            plugin_id: plugin.id.clone(),
            document_id,
            configuration: plugin.configuration.clone(),
            io_config,
            cancel,
            span,
        }
    }

    /// Deserialize the plugin configuration into a typed struct
    pub fn config_as<T>(&self) -> Result<T, PluginError>
    where
        T: for<'de> Deserialize<'de>,
    {
        serde_json::from_value(self.configuration.clone())
            .map_err(|e| PluginError::InvalidConfiguration(e.to_string()))
    }
}

/// A unit of document processing.
///
/// Plugins report failure through `PluginError`; panics are caught by the
/// runner and reported as failures too. A plugin that runs for a long time
/// should watch `context.cancel` and return [`PluginError::Cancelled`].
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name requests use to select this plugin
    fn name(&self) -> &str;

    /// Execute the plugin against one document
    async fn execute(&self, context: PluginContext) -> Result<JsonValue, PluginError>;

    /// Validate plugin configuration before execution
    fn validate_config(&self, config: &JsonValue) -> Result<(), PluginError> {
        let _ = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationController;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Settings {
        threshold: u32,
    }

    #[test]
    fn test_config_as() {
        let controller = CancellationController::new();
        let plugin = PluginConfig::new("p1", "ocr", json!({"threshold": 7}));
        let context = PluginContext::new("doc-1", &plugin, IoConfig::default(), controller.observer());

        let settings: Settings = context.config_as().unwrap();
        assert_eq!(settings.threshold, 7);
        assert_eq!(context.plugin_id, "p1");
        assert_eq!(context.document_id, "doc-1");

        let bad = PluginConfig::new("p2", "ocr", json!({"threshold": "high"}));
        let context = PluginContext::new("doc-1", &bad, IoConfig::default(), controller.observer());
        let err = context.config_as::<Settings>().unwrap_err();
        assert!(matches!(err, PluginError::InvalidConfiguration(_)));
    }
}
