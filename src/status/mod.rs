//! # Status Module
//!
//! Internal observability of the agent.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: Installs the Prometheus recorder and binds the
//!   status listener.
//!
//! - **`Metrics`**: A cloneable handle used by the scheduler to update its
//!   counters and gauges.
//!
//! - **`StatusServer`**: (Defined in `server.rs`) An `axum` server exposing
//!   `/status` (the scheduler `metrics` query) and `/metrics`.
//!
//! - **`SystemCollector`**: (Defined in `system.rs`) A background task
//!   reporting the agent's own CPU and memory usage.

pub mod server;
pub mod system;

use crate::config::StatusConfig;
use metrics::{Counter, Gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

pub use server::StatusServer;
pub use system::SystemCollector;

/// The public API for the metrics system.
#[derive(Clone)]
pub struct Metrics {
    pub tasks_finished_total: Counter,
    pub item_errors_total: Counter,
    pub clock_skew_total: Counter,
    pub active_tasks: Gauge,
    pub queued_plugins: Gauge,
    pub clients: Gauge,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Registers descriptions for all scheduler metrics with the global
    /// recorder and returns handles to them.
    ///
    /// Without an installed recorder every handle is a no-op.
    pub fn new() -> Self {
        metrics::describe_counter!("scheduler_tasks_dispatched_total", Unit::Count, "Total number of tasks handed to plugins, labeled by plugin.");
        metrics::describe_counter!("scheduler_tasks_finished_total", Unit::Count, "Total number of tasks that reported completion.");
        metrics::describe_counter!("scheduler_item_errors_total", Unit::Count, "Total number of requested items rejected before scheduling.");
        metrics::describe_counter!("scheduler_clock_skew_total", Unit::Count, "Total number of wall clock jumps that forced a full reschedule.");
        metrics::describe_gauge!("scheduler_active_tasks", Unit::Count, "The number of tasks currently running.");
        metrics::describe_gauge!("scheduler_queued_plugins", Unit::Count, "The number of plugins waiting in the scheduler queue.");
        metrics::describe_gauge!("scheduler_clients", Unit::Count, "The number of known requesters.");
        metrics::describe_gauge!("process_cpu_usage_percent", Unit::Percent, "The percentage of CPU time the agent process is currently using.");
        metrics::describe_gauge!("process_memory_usage_bytes", Unit::Bytes, "The resident set size of the agent process, in bytes.");

        Self {
            tasks_finished_total: metrics::counter!("scheduler_tasks_finished_total"),
            item_errors_total: metrics::counter!("scheduler_item_errors_total"),
            clock_skew_total: metrics::counter!("scheduler_clock_skew_total"),
            active_tasks: metrics::gauge!("scheduler_active_tasks"),
            queued_plugins: metrics::gauge!("scheduler_queued_plugins"),
            clients: metrics::gauge!("scheduler_clients"),
        }
    }

    /// Increments the dispatch counter of a plugin.
    pub fn increment_dispatched(&self, plugin: &str) {
        metrics::counter!("scheduler_tasks_dispatched_total", "plugin" => plugin.to_string()).increment(1);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound, not yet serving, status endpoint.
pub struct StatusEndpoint {
    pub listener: TcpListener,
    pub prom_handle: PrometheusHandle,
    pub addr: SocketAddr,
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: StatusConfig,
}

impl MetricsBuilder {
    pub fn new(config: StatusConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and binds the status listener.
    ///
    /// Returns `None` for the endpoint when the status server is disabled or
    /// its address cannot be bound.
    pub fn build(self) -> (Metrics, Option<StatusEndpoint>) {
        if !self.config.enabled {
            return (Metrics::new(), None);
        }

        let recorder = PrometheusBuilder::new().build_recorder();
        let prom_handle = recorder.handle();

        let listener = match std::net::TcpListener::bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(address = %self.config.listen_address, error = %e, "Failed to bind status server.");
                return (Metrics::new(), None);
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!(error = %e, "Failed to get local address for status server.");
                return (Metrics::new(), None);
            }
        };
        // The listener must be non-blocking to be used with Tokio.
        let listener = match listener
            .set_nonblocking(true)
            .and_then(|_| TcpListener::from_std(listener))
        {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "Failed to register status listener with the runtime.");
                return (Metrics::new(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            // the status page still works, /metrics stays empty
            error!(error = %e, "Failed to install Prometheus recorder.");
        }

        (
            Metrics::new(),
            Some(StatusEndpoint {
                listener,
                prom_handle,
                addr,
            }),
        )
    }
}
