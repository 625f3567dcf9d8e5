/// MetricWatch - A plugin based metric collection agent
///
/// This library provides the plugin scheduler and the built-in collectors
/// used by the `metricwatch` binary.
pub mod alias;
pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod expression;
pub mod interval;
pub mod itemkey;
pub mod plugin;
pub mod plugins;
pub mod scheduler;
pub mod status;
pub mod task_manager;

// Re-export core types for convenience
pub use core::*;
