//! Test helpers for running the full application instance.

use anyhow::Result;
use metricwatch::{
    app::AppBuilder, config::Config, plugin::PluginRegistry, scheduler::SchedulerHandle,
    status::Metrics,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::timeout};

/// Represents a running instance of the application for testing purposes.
pub struct TestApp {
    pub scheduler: SchedulerHandle,
    pub shutdown_tx: watch::Sender<bool>,
    pub app_handle: Option<JoinHandle<Result<()>>>,
    status_addr: Option<SocketAddr>,
}

impl TestApp {
    pub fn status_addr(&self) -> SocketAddr {
        self.status_addr
            .expect("Status server must be enabled to get the address")
    }

    /// Shuts down the application and waits for it to terminate.
    /// Fails if the application does not shut down within the specified timeout.
    pub async fn shutdown(self, timeout_duration: Duration) -> Result<()> {
        self.shutdown_tx
            .send(true)
            .expect("Failed to send shutdown signal");

        if let Some(handle) = self.app_handle {
            match timeout(timeout_duration, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!("App failed to shut down within the timeout")),
            }
        } else {
            Ok(())
        }
    }
}

/// A builder for creating `TestApp` instances with specific configurations.
pub struct TestAppBuilder {
    pub config: Config,
    registry: Option<PluginRegistry>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_config_modifier(mut self, modifier: impl FnOnce(&mut Config)) -> Self {
        modifier(&mut self.config);
        self
    }

    pub fn with_status_server(mut self) -> Self {
        self.config.status.enabled = true;
        self.config.status.listen_address = "127.0.0.1:0".parse().unwrap();
        self
    }

    pub async fn start(self) -> Result<TestApp> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status_enabled = self.config.status.enabled;
        let mut builder = AppBuilder::new(self.config);
        if let Some(registry) = self.registry {
            builder = builder.registry_override(registry);
        }
        if !status_enabled {
            builder = builder.metrics_override(Metrics::new());
        }
        let app = builder.build(shutdown_rx).await?;
        let scheduler = app.scheduler();
        let status_addr = app.status_addr();
        let app_handle = tokio::spawn(app.run());

        Ok(TestApp {
            scheduler,
            shutdown_tx,
            app_handle: Some(app_handle),
            status_addr,
        })
    }
}
