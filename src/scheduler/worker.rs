//! Execution of dispatched tasks outside the control loop.

use super::task::{Task, TaskId, TaskKind};
use super::ItemError;
use crate::core::{Request, Sink, TaskResult};
use crate::plugin::{ExportContext, Plugin, WatchContext};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Reported back to the control loop once a job completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    /// The plugin reported an error or panicked.
    pub failed: bool,
}

pub enum Action {
    Configure(serde_json::Value),
    Start,
    Stop,
    Collect,
    Watch {
        requests: Vec<Request>,
        ctx: WatchContext,
    },
    Export {
        key: String,
        params: Vec<String>,
        ctx: ExportContext,
        sink: Sink,
        direct: bool,
    },
}

/// A snapshot of a task taken at dispatch time.
pub struct Job {
    pub task_id: TaskId,
    pub plugin_name: String,
    pub plugin: Arc<dyn Plugin>,
    pub action: Action,
}

impl Job {
    pub fn new(task: &Task, plugin_name: &str, plugin: Arc<dyn Plugin>) -> Self {
        let export = |item: &super::task::ExportItem, direct: bool| Action::Export {
            key: item.key.clone(),
            params: item.params.clone(),
            ctx: ExportContext {
                client_id: task.client_id,
                itemid: item.itemid,
                last_logsize: item.last_logsize,
                mtime: item.mtime,
                global_regexp: item.global_regexp.clone(),
            },
            sink: item.sink.clone(),
            direct,
        };
        let action = match &task.kind {
            TaskKind::Configurator(options) => Action::Configure(options.clone()),
            TaskKind::Starter => Action::Start,
            TaskKind::Stopper => Action::Stop,
            TaskKind::Collector { .. } => Action::Collect,
            TaskKind::Watcher {
                requests,
                sink,
                global_regexp,
            } => Action::Watch {
                requests: requests.clone(),
                ctx: WatchContext {
                    client_id: task.client_id,
                    sink: sink.clone(),
                    global_regexp: global_regexp.clone(),
                },
            },
            TaskKind::Exporter(item) => export(item, false),
            TaskKind::DirectExporter(item) => export(item, true),
        };
        Self {
            task_id: task.id,
            plugin_name: plugin_name.to_string(),
            plugin,
            action,
        }
    }

    /// Runs the job to completion.
    ///
    /// A panicking plugin is contained here: the panic is logged, an error
    /// result is delivered for export jobs, and the job still reports back.
    pub async fn run(self) -> TaskOutcome {
        let task_id = self.task_id;
        let plugin_name = self.plugin_name.clone();
        let export_target = match &self.action {
            Action::Export { ctx, sink, .. } => Some((ctx.itemid, sink.clone())),
            _ => None,
        };

        match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(failed) => TaskOutcome { task_id, failed },
            Err(panic) => {
                error!(
                    plugin = %plugin_name,
                    task_id,
                    panic = %panic_message(panic.as_ref()),
                    "Plugin panicked while performing a task."
                );
                if let Some((itemid, sink)) = export_target {
                    sink.write(TaskResult::error(
                        itemid,
                        ItemError::PluginPanic(plugin_name),
                        Utc::now(),
                    ));
                }
                TaskOutcome {
                    task_id,
                    failed: true,
                }
            }
        }
    }

    async fn execute(self) -> bool {
        let plugin = self.plugin;
        match self.action {
            Action::Configure(options) => {
                plugin.configure(&options);
                false
            }
            Action::Start => {
                plugin.start().await;
                false
            }
            Action::Stop => {
                plugin.stop().await;
                false
            }
            Action::Collect => match plugin.collect().await {
                Ok(()) => false,
                Err(e) => {
                    warn!(plugin = %self.plugin_name, error = %e, "Collection failed.");
                    true
                }
            },
            Action::Watch { requests, ctx } => {
                plugin.watch(requests, ctx).await;
                false
            }
            Action::Export {
                key,
                params,
                ctx,
                sink,
                direct,
            } => {
                if !direct && sink.slots_available() == 0 {
                    debug!(plugin = %self.plugin_name, itemid = ctx.itemid, "Result buffer is full, skipping collection.");
                    return false;
                }
                let result = plugin.export(&key, &params, &ctx).await;
                let ts = Utc::now();
                match result {
                    // recurring exports only report values that exist
                    Ok(None) if !direct => false,
                    Ok(value) => {
                        sink.write(TaskResult {
                            itemid: ctx.itemid,
                            value: Ok(value),
                            last_logsize: ctx.last_logsize,
                            mtime: ctx.mtime,
                            ts,
                        });
                        false
                    }
                    Err(e) => {
                        debug!(plugin = %self.plugin_name, itemid = ctx.itemid, key = %key, error = %e, "Export failed.");
                        sink.write(TaskResult::error(ctx.itemid, e.into(), ts));
                        true
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
