//! Information about the agent itself.

use super::no_params;
use crate::plugin::{Capabilities, ExportContext, Plugin, PluginError};
use async_trait::async_trait;
use sysinfo::System;

pub struct AgentPlugin {
    hostname: String,
}

impl AgentPlugin {
    pub const METRICS: &'static [(&'static str, &'static str)] = &[
        ("agent.hostname", "Returns Hostname from agent configuration."),
        ("agent.ping", "Returns agent availability check result."),
        ("agent.version", "Version of agent."),
    ];

    /// Uses the configured host name, falling back to the system one.
    pub fn new(hostname: Option<String>) -> Self {
        let hostname = hostname
            .filter(|h| !h.is_empty())
            .or_else(System::host_name)
            .unwrap_or_else(|| "localhost".to_string());
        Self { hostname }
    }
}

#[async_trait]
impl Plugin for AgentPlugin {
    fn name(&self) -> &str {
        "Agent"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::EXPORTER
    }

    async fn export(
        &self,
        key: &str,
        params: &[String],
        _ctx: &ExportContext,
    ) -> Result<Option<String>, PluginError> {
        no_params(params)?;
        match key {
            "agent.hostname" => Ok(Some(self.hostname.clone())),
            "agent.ping" => Ok(Some("1".to_string())),
            "agent.version" => Ok(Some(env!("CARGO_PKG_VERSION").to_string())),
            _ => Err(PluginError::UnsupportedKey),
        }
    }
}
