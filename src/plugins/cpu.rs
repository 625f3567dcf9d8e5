//! Global CPU utilisation, sampled once per second.
//!
//! `sysinfo` computes usage as the difference between two refreshes, so the
//! first collection only primes the counters and `system.cpu.util` reports
//! no value until the second one.

use crate::plugin::{Capabilities, ExportContext, Plugin, PluginError};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use sysinfo::System;
use tracing::trace;

struct CpuState {
    system: System,
    primed: bool,
    last: Option<f32>,
}

pub struct CpuPlugin {
    state: Mutex<CpuState>,
}

impl CpuPlugin {
    pub const METRICS: &'static [(&'static str, &'static str)] =
        &[("system.cpu.util", "CPU utilisation percentage.")];

    pub fn new() -> Self {
        Self {
            state: Mutex::new(CpuState {
                system: System::new(),
                primed: false,
                last: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CpuState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores a sample directly, bypassing the system counters.
    #[cfg(test)]
    fn record(&self, usage: f32) {
        self.state().last = Some(usage);
    }
}

impl Default for CpuPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CpuPlugin {
    fn name(&self) -> &str {
        "Cpu"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::COLLECTOR | Capabilities::EXPORTER
    }

    fn period(&self) -> u32 {
        1
    }

    async fn collect(&self) -> Result<(), PluginError> {
        let mut state = self.state();
        state.system.refresh_cpu();
        if state.primed {
            let usage = state.system.global_cpu_info().cpu_usage();
            trace!(usage, "CPU sample collected.");
            state.last = Some(usage);
        } else {
            state.primed = true;
        }
        Ok(())
    }

    async fn export(
        &self,
        key: &str,
        params: &[String],
        _ctx: &ExportContext,
    ) -> Result<Option<String>, PluginError> {
        if key != "system.cpu.util" {
            return Err(PluginError::UnsupportedKey);
        }
        match params.first().map(String::as_str) {
            None | Some("") | Some("all") => {}
            Some(_) => {
                return Err(PluginError::InvalidParameters(
                    "Invalid first parameter.".to_string(),
                ))
            }
        }
        if params.iter().skip(1).any(|p| !p.is_empty()) {
            return Err(PluginError::InvalidParameters(
                "Too many parameters.".to_string(),
            ));
        }
        Ok(self.state().last.map(|usage| format!("{usage:.6}")))
    }
}
