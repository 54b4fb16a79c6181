//! Plugins with scripted behaviour for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use crate::error::PluginError;
use crate::plugin::{Plugin, PluginContext};
use crate::registry::PluginRegistry;

/// Fails with `configuration.message`
pub struct FailPlugin;

#[async_trait]
impl Plugin for FailPlugin {
    fn name(&self) -> &str {
        "fail"
    }

    async fn execute(&self, context: PluginContext) -> Result<JsonValue, PluginError> {
        let message = context
            .configuration
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or("plugin failed");
        Err(PluginError::failed(message))
    }
}

pub struct PanicPlugin;

#[async_trait]
impl Plugin for PanicPlugin {
    fn name(&self) -> &str {
        "panic"
    }

    async fn execute(&self, _context: PluginContext) -> Result<JsonValue, PluginError> {
        panic!("plugin exploded");
    }
}

/// Sleeps for an hour and ignores cancellation
pub struct StubbornPlugin;

#[async_trait]
impl Plugin for StubbornPlugin {
    fn name(&self) -> &str {
        "stubborn"
    }

    async fn execute(&self, _context: PluginContext) -> Result<JsonValue, PluginError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!(null))
    }
}

/// Records how many instances run at the same time
#[derive(Default)]
pub struct GaugePlugin {
    pub current: AtomicUsize,
    pub peak: AtomicUsize,
}

#[async_trait]
impl Plugin for GaugePlugin {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn execute(&self, _context: PluginContext) -> Result<JsonValue, PluginError> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "running": running }))
    }
}

pub fn registry_with_test_plugins() -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtin_plugins();
    registry.register(Arc::new(FailPlugin)).unwrap();
    registry.register(Arc::new(PanicPlugin)).unwrap();
    registry.register(Arc::new(StubbornPlugin)).unwrap();
    registry
}
