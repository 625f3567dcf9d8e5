#![allow(dead_code)]
pub mod app;
pub mod sink;

pub use metricwatch::plugin::testing::FakePlugin;

use metricwatch::plugin::{Plugin, PluginRegistry};
use std::sync::Arc;

/// Builds a registry holding the given plugins and the keys each serves.
pub fn registry_with(plugins: Vec<(Arc<FakePlugin>, Vec<&str>)>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for (plugin, keys) in plugins {
        let metrics: Vec<(&str, &str)> = keys.iter().map(|k| (*k, "test metric")).collect();
        registry
            .register(plugin as Arc<dyn Plugin>, &metrics)
            .expect("test registry must be valid");
    }
    registry
}
