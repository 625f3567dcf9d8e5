//! Configuration management for MetricWatch
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer built-in defaults, an optional TOML file,
//! `METRICWATCH_` environment variables and command-line overrides.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::cli::Cli;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Host name reported by the `agent.hostname` metric. Detected when unset.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Key aliases in `alias:key` form.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Scheduler tuning.
    pub scheduler: SchedulerConfig,
    /// Diagnostic HTTP endpoint.
    pub status: StatusConfig,
    /// Per plugin settings, keyed by plugin name.
    #[serde(default)]
    pub plugins: HashMap<String, PluginConfig>,
}

/// Tuning knobs of the scheduler control loop.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    /// Capacity of the scheduler mailbox.
    pub mailbox_capacity: usize,
    /// How long running tasks may take to finish after shutdown was requested.
    pub shutdown_timeout_seconds: u64,
    /// Wall clock jumps of at least this many seconds reschedule every task.
    pub clock_skew_tolerance_seconds: i64,
    /// How often idle clients are released.
    pub cleanup_interval_seconds: i64,
}

/// Configuration for the status and metrics HTTP server.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatusConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
    /// Also report the agent's own CPU and memory usage.
    #[serde(default)]
    pub system_metrics_enabled: bool,
}

/// Settings for a single plugin.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct PluginConfig {
    /// Maximum number of concurrently running tasks. 0 keeps the plugin's own limit.
    ///
    /// Kept loose so that a malformed value falls back to the default
    /// instead of rejecting the whole configuration.
    #[serde(default)]
    pub capacity: Option<serde_json::Value>,
    /// Everything else is handed to the plugin as its options.
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl SchedulerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Config {
    /// Loads the application configuration.
    ///
    /// Sources are layered in order: defaults, the TOML file named by
    /// `--config`, environment variables and finally command-line arguments.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = &cli.config {
            if !path.exists() {
                anyhow::bail!("configuration file {} does not exist", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            // e.g. METRICWATCH_SCHEDULER__MAILBOX_CAPACITY=32
            .merge(Env::prefixed("METRICWATCH_").split("__"))
            .merge(cli)
            .extract()?;
        Ok(config)
    }

    /// Options of a plugin as a JSON object, `null` when it has none.
    pub fn plugin_options(&self, name: &str) -> serde_json::Value {
        match self.plugins.get(name) {
            Some(plugin) if !plugin.options.is_empty() => {
                serde_json::Value::Object(plugin.options.clone())
            }
            _ => serde_json::Value::Null,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 10,
            shutdown_timeout_seconds: 5,
            clock_skew_tolerance_seconds: 10,
            cleanup_interval_seconds: 3600,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 31999)),
            system_metrics_enabled: false,
        }
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            hostname: None,
            aliases: Vec::new(),
            scheduler: SchedulerConfig::default(),
            status: StatusConfig::default(),
            plugins: HashMap::new(),
        }
    }
}
