//! Collectors compiled into the agent binary.

pub mod agent;
pub mod cpu;
pub mod system;

use crate::config::Config;
use crate::plugin::{PluginError, PluginRegistry, RegistryError};
use std::sync::Arc;

pub use agent::AgentPlugin;
pub use cpu::CpuPlugin;
pub use system::SystemPlugin;

/// Builds the registry of every built-in collector.
pub fn builtin_registry(config: &Config) -> Result<PluginRegistry, RegistryError> {
    let mut registry = PluginRegistry::new();
    registry.register(
        Arc::new(AgentPlugin::new(config.hostname.clone())),
        AgentPlugin::METRICS,
    )?;
    registry.register(Arc::new(SystemPlugin::new()), SystemPlugin::METRICS)?;
    registry.register(Arc::new(CpuPlugin::new()), CpuPlugin::METRICS)?;
    Ok(registry)
}

pub(crate) fn no_params(params: &[String]) -> Result<(), PluginError> {
    if params.iter().any(|p| !p.is_empty()) {
        return Err(PluginError::InvalidParameters(
            "Too many parameters.".to_string(),
        ));
    }
    Ok(())
}
