//! Collector plugin contract and registry.
//!
//! A plugin declares its name, the metric keys it serves, its capability set
//! and its maximum concurrency. The scheduler never looks further into a
//! plugin than this declaration and the operations of [`Plugin`].

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use crate::core::{Request, Sink};
use crate::expression::GlobalRegexp;
use async_trait::async_trait;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Capacity used when a plugin does not declare one, or when its configured
/// capacity is invalid.
pub const DEFAULT_CAPACITY: usize = 100;

bitflags! {
    /// The behaviours a plugin supports, fixed at registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Produces a value on demand for a key.
        const EXPORTER = 1 << 0;
        /// Gathers data on its own period.
        const COLLECTOR = 1 << 1;
        /// Runs continuously between start and stop.
        const RUNNER = 1 << 2;
        /// Observes requested items without being polled.
        const WATCHER = 1 << 3;
        /// Accepts plugin specific configuration.
        const CONFIGURATOR = 1 << 4;
    }
}

impl Capabilities {
    /// Human readable list of interfaces, e.g. `exporter, runner`.
    pub fn describe(&self) -> String {
        let names = [
            (Capabilities::EXPORTER, "exporter"),
            (Capabilities::COLLECTOR, "collector"),
            (Capabilities::RUNNER, "runner"),
            (Capabilities::WATCHER, "watcher"),
            (Capabilities::CONFIGURATOR, "configurator"),
        ];
        names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    #[error("Unsupported item key.")]
    UnsupportedKey,
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("{0}")]
    Failed(String),
    #[error("plugin does not implement {0}")]
    NotImplemented(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("metric \"{0}\" is already registered by plugin {1}")]
    DuplicateKey(String, String),
    #[error("plugin name \"{0}\" is already used by another plugin")]
    DuplicatePlugin(String),
    #[error("plugin {0} declares no capabilities")]
    NoCapabilities(String),
}

/// Inputs handed to an exporter for one collection.
#[derive(Debug, Clone, Default)]
pub struct ExportContext {
    pub client_id: u64,
    pub itemid: u64,
    pub last_logsize: Option<u64>,
    pub mtime: Option<i64>,
    pub global_regexp: Arc<GlobalRegexp>,
}

/// Inputs handed to a watcher when its set of watched items changes.
#[derive(Clone)]
pub struct WatchContext {
    pub client_id: u64,
    pub sink: Sink,
    pub global_regexp: Arc<GlobalRegexp>,
}

/// A metric collector.
///
/// Only the operations matching the declared [`Capabilities`] are ever
/// invoked by the scheduler; the defaults report that the operation is not
/// implemented.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name, also used as its configuration section.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Maximum number of concurrently running tasks.
    fn capacity(&self) -> usize {
        DEFAULT_CAPACITY
    }

    async fn export(
        &self,
        _key: &str,
        _params: &[String],
        _ctx: &ExportContext,
    ) -> Result<Option<String>, PluginError> {
        Err(PluginError::NotImplemented("export"))
    }

    /// Collection period in seconds for collectors.
    fn period(&self) -> u32 {
        1
    }

    async fn collect(&self) -> Result<(), PluginError> {
        Err(PluginError::NotImplemented("collect"))
    }

    async fn start(&self) {}

    async fn stop(&self) {}

    /// Replaces the set of watched items. An empty list means stop watching
    /// on behalf of this client.
    async fn watch(&self, _requests: Vec<Request>, _ctx: WatchContext) {}

    fn configure(&self, _options: &serde_json::Value) {}

    fn validate(&self, _options: &serde_json::Value) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Immutable description of a registered plugin.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub capabilities: Capabilities,
    /// Declared maximum capacity.
    pub capacity: usize,
    pub plugin: Arc<dyn Plugin>,
}

impl PluginDescriptor {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        Self {
            name: plugin.name().to_string(),
            capabilities: plugin.capabilities(),
            capacity: plugin.capacity(),
            plugin,
        }
    }

    pub fn has(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// A metric key served by a plugin.
#[derive(Clone)]
pub struct Metric {
    pub key: String,
    pub description: String,
    pub plugin: Arc<dyn Plugin>,
}

/// The static set of available collectors, built once at start-up.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    metrics: BTreeMap<String, Metric>,
    plugins: BTreeMap<String, PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin together with the `(key, description)` pairs it serves.
    pub fn register(
        &mut self,
        plugin: Arc<dyn Plugin>,
        metrics: &[(&str, &str)],
    ) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        if plugin.capabilities().is_empty() {
            return Err(RegistryError::NoCapabilities(name));
        }
        if let Some(existing) = self.plugins.get(&name) {
            if !Arc::ptr_eq(&existing.plugin, &plugin) {
                return Err(RegistryError::DuplicatePlugin(name));
            }
        }
        for (key, _) in metrics {
            if let Some(existing) = self.metrics.get(*key) {
                return Err(RegistryError::DuplicateKey(
                    key.to_string(),
                    existing.plugin.name().to_string(),
                ));
            }
        }

        self.plugins
            .entry(name)
            .or_insert_with(|| PluginDescriptor::new(plugin.clone()));
        for (key, description) in metrics {
            self.metrics.insert(
                key.to_string(),
                Metric {
                    key: key.to_string(),
                    description: description.to_string(),
                    plugin: plugin.clone(),
                },
            );
        }
        Ok(())
    }

    /// Registered plugins ordered by name.
    pub fn plugins(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values()
    }

    /// Registered metrics ordered by key.
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    pub fn get(&self, key: &str) -> Option<&Metric> {
        self.metrics.get(key)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
