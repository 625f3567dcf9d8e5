//! # Process Metrics Collector
//!
//! Periodically reports the agent's own CPU and memory usage through the
//! `process_*` gauges, using the `sysinfo` crate.

use std::time::Duration;
use sysinfo::System;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, trace};

const COLLECTION_INTERVAL: Duration = Duration::from_secs(10);

pub struct SystemCollector {
    system: System,
    shutdown_rx: watch::Receiver<bool>,
}

impl SystemCollector {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            system: System::new(),
            shutdown_rx,
        }
    }

    /// Runs until shutdown or until the process can no longer be observed.
    pub async fn run(mut self) {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                error!(error = %e, "Failed to get current PID.");
                return;
            }
        };
        let mut interval = time::interval(COLLECTION_INTERVAL);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break,
                _ = interval.tick() => {}
            }
            self.system.refresh_cpu();
            if !self.system.refresh_process(pid) {
                error!(%pid, "Monitored process no longer found, stopping process metrics.");
                break;
            }
            if let Some(process) = self.system.process(pid) {
                metrics::gauge!("process_cpu_usage_percent").set(process.cpu_usage() as f64);
                metrics::gauge!("process_memory_usage_bytes").set(process.memory() as f64);
            }
        }
        trace!("Process metrics collector finished.");
    }
}
