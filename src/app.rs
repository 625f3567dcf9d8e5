//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    plugin::PluginRegistry,
    plugins::builtin_registry,
    scheduler::{Manager, SchedulerHandle},
    status::{Metrics, MetricsBuilder, StatusServer, SystemCollector},
    task_manager::TaskManager,
};
use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

/// Extra time given to tracked tasks on top of the scheduler's own drain countdown.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(2);

/// A handle to the running application, containing all its task handles.
pub struct App {
    task_manager: TaskManager,
    scheduler: SchedulerHandle,
    status_addr: Option<SocketAddr>,
    shutdown_grace: Duration,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// Handle used to submit work to the scheduler.
    pub fn scheduler(&self) -> SchedulerHandle {
        self.scheduler.clone()
    }

    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status_addr
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown(self.shutdown_grace).await;

        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Components can be overridden for testing purposes.
pub struct AppBuilder {
    config: Config,
    registry_override: Option<PluginRegistry>,
    metrics_override: Option<Metrics>,
}

impl AppBuilder {
    /// Creates a new `AppBuilder` with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry_override: None,
            metrics_override: None,
        }
    }

    /// Replaces the built-in collectors.
    pub fn registry_override(mut self, registry: PluginRegistry) -> Self {
        self.registry_override = Some(registry);
        self
    }

    /// Overrides the metrics system for testing.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Builds and starts all application components, returning a runnable `App`.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // 1. Initialize Metrics
        // =========================================================================
        let (metrics, endpoint) = match self.metrics_override {
            Some(m) => (m, None),
            None => MetricsBuilder::new(config.status.clone()).build(),
        };

        // =========================================================================
        // 2. Plugins and Scheduler
        // =========================================================================
        let registry = match self.registry_override {
            Some(registry) => registry,
            None => builtin_registry(&config)?,
        };
        debug!(metrics = registry.len(), "Plugin registry ready.");

        let manager = Manager::new(&registry, &config, metrics)?;
        let scheduler = manager.start(&task_manager);

        // =========================================================================
        // 3. Status Endpoint
        // =========================================================================
        let status_addr = match endpoint {
            Some(endpoint) => {
                let addr = endpoint.addr;
                info!(%addr, "Status server listening.");
                let server =
                    StatusServer::new(endpoint, scheduler.clone(), task_manager.get_shutdown_rx());
                task_manager.spawn("StatusServer", server.run());
                if config.status.system_metrics_enabled {
                    let collector = SystemCollector::new(task_manager.get_shutdown_rx());
                    task_manager.spawn("SystemCollector", collector.run());
                }
                Some(addr)
            }
            None => None,
        };

        Ok(App {
            task_manager,
            scheduler,
            status_addr,
            shutdown_grace: config.scheduler.shutdown_timeout() + SHUTDOWN_MARGIN,
        })
    }
}
