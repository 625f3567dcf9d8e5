//! Static host information read through `sysinfo`.

use super::no_params;
use crate::plugin::{Capabilities, ExportContext, Plugin, PluginError};
use async_trait::async_trait;
use sysinfo::System;

pub struct SystemPlugin;

impl SystemPlugin {
    pub const METRICS: &'static [(&'static str, &'static str)] = &[
        ("system.hostname", "Returns system host name."),
        ("system.uptime", "Returns system uptime in seconds."),
        ("system.cpu.num", "Number of CPUs."),
        ("system.sw.os", "Operating system information."),
    ];

    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn cpu_count() -> usize {
    let mut system = System::new();
    system.refresh_cpu();
    system.cpus().len()
}

#[async_trait]
impl Plugin for SystemPlugin {
    fn name(&self) -> &str {
        "System"
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
        match key {
            "system.hostname" => {
                no_params(params)?;
                System::host_name()
                    .map(Some)
                    .ok_or_else(|| PluginError::Failed("Cannot obtain host name.".to_string()))
            }
            "system.uptime" => {
                no_params(params)?;
                Ok(Some(System::uptime().to_string()))
            }
            "system.cpu.num" => {
                // only the "online" type is supported
                match params.first().map(String::as_str) {
                    None | Some("") | Some("online") => {}
                    Some(_) => {
                        return Err(PluginError::InvalidParameters(
                            "Invalid first parameter.".to_string(),
                        ))
                    }
                }
                if params.len() > 1 {
                    return Err(PluginError::InvalidParameters(
                        "Too many parameters.".to_string(),
                    ));
                }
                Ok(Some(cpu_count().to_string()))
            }
            "system.sw.os" => {
                no_params(params)?;
                let os = System::long_os_version()
                    .or_else(System::name)
                    .ok_or_else(|| {
                        PluginError::Failed("Cannot obtain system information.".to_string())
                    })?;
                Ok(Some(os))
            }
            _ => Err(PluginError::UnsupportedKey),
        }
    }
}
