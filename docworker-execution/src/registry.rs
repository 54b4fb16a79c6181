//! Plugin registry

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ExecutionError;
use crate::plugin::Plugin;
use crate::plugins::{EchoPlugin, SleepPlugin};

/// Name-indexed set of plugins available to a worker.
///
/// Built once during bootstrap and shared read-only afterwards.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the plugins shipped in this crate
    pub fn with_builtin_plugins() -> Self {
        let mut registry = Self::new();
        for plugin in [
            Arc::new(EchoPlugin) as Arc<dyn Plugin>,
            Arc::new(SleepPlugin) as Arc<dyn Plugin>,
        ] {
            // Built-in names are distinct
            let _ = registry.register(plugin);
        }
        registry
    }

    /// Register a plugin under its own name
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), ExecutionError> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(ExecutionError::PluginAlreadyRegistered(name));
        }

        self.plugins.insert(name.clone(), plugin);
        tracing::debug!(
            target: "plugin_registry",
            plugin = %name,
            "Plugin registered"
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered plugin names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
