//! Per-requester bookkeeping.

use super::pool::AgentPool;
use super::task::{AgentId, ExportItem, Task, TaskId, TaskKind};
use super::{ItemError, DIRECT_CLIENT_ID};
use crate::core::{Request, Sink};
use crate::expression::{Expression, ExpressionError, GlobalRegexp};
use crate::interval::parse_delay;
use crate::plugin::Capabilities;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// How a client uses one plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginInfo {
    /// Time of the last update request that referenced the plugin.
    pub used: Option<DateTime<Utc>>,
    /// Generation of the last update request that referenced the plugin.
    pub generation: u64,
    /// Watcher task created for an update, with that update's generation.
    pub watcher: Option<(TaskId, u64)>,
}

/// A requester with the items it currently monitors.
pub struct Client {
    pub id: u64,
    pub sink: Sink,
    /// Exporter tasks by item id. Unused for the direct client.
    pub exporters: HashMap<u64, TaskId>,
    pub plugins_info: HashMap<AgentId, PluginInfo>,
    pub refresh_unsupported: i64,
    pub global_regexp: Arc<GlobalRegexp>,
    /// Incremented by every update request, so that items are diffed
    /// independently of the wall clock.
    generation: u64,
}

/// A parsed item ready to be bound to a plugin.
pub struct ItemRequest {
    pub request: Request,
    pub name: String,
    pub params: Vec<String>,
}

impl Client {
    pub fn new(id: u64, sink: Sink) -> Self {
        Self {
            id,
            sink,
            exporters: HashMap::new(),
            plugins_info: HashMap::new(),
            refresh_unsupported: 0,
            global_regexp: Arc::new(GlobalRegexp::default()),
            generation: 0,
        }
    }

    /// Starts a new update request. Items and plugins not referenced again
    /// before the next [`Client::cleanup`] are released by it.
    pub fn begin_update(&mut self) {
        self.generation += 1;
    }

    pub fn is_direct(&self) -> bool {
        self.id == DIRECT_CLIENT_ID
    }

    /// Recompiles the global expressions when they changed.
    pub fn update_expressions(&mut self, expressions: Vec<Expression>) -> Result<(), ExpressionError> {
        if !self.global_regexp.is_same(&expressions) {
            self.global_regexp = Arc::new(GlobalRegexp::new(expressions)?);
        }
        Ok(())
    }

    /// Binds one requested item to a plugin, creating or updating the tasks
    /// serving it.
    pub fn add_request(
        &mut self,
        pool: &mut AgentPool,
        agent_id: AgentId,
        item: ItemRequest,
        now: DateTime<Utc>,
    ) -> Result<(), ItemError> {
        let agent = &pool.agents[agent_id];
        let capabilities = agent.descriptor.capabilities;
        let options = agent.options.clone();
        let period = i64::from(agent.descriptor.plugin.period());

        if capabilities.contains(Capabilities::EXPORTER) && !self.is_direct() {
            // refuse invalid intervals before any side effect
            parse_delay(&item.request.delay)?;
        }

        let info = self.plugins_info.entry(agent_id).or_default();
        let first_use = info.used.is_none();
        if first_use && pool.agents[agent_id].refcount == 0 {
            debug!(plugin = %pool.agents[agent_id].name(), client_id = self.id, "Activating plugin.");
            if capabilities.contains(Capabilities::CONFIGURATOR) {
                schedule(pool, Task::new(agent_id, self.id, TaskKind::Configurator(options)), now)?;
            }
            if capabilities.contains(Capabilities::RUNNER) {
                schedule(pool, Task::new(agent_id, self.id, TaskKind::Starter), now)?;
            }
            if capabilities.contains(Capabilities::COLLECTOR) {
                schedule(pool, Task::new(agent_id, self.id, TaskKind::Collector { period }), now)?;
            }
        }

        if capabilities.contains(Capabilities::EXPORTER) {
            if self.is_direct() {
                let export = self.export_item(&item);
                schedule(pool, Task::new(agent_id, self.id, TaskKind::DirectExporter(export)), now)?;
            } else {
                self.add_exporter(pool, agent_id, &item, now)?;
            }
        }

        if capabilities.contains(Capabilities::WATCHER) {
            self.add_watched(pool, agent_id, item.request, now)?;
        }

        let info = self.plugins_info.entry(agent_id).or_default();
        if first_use {
            pool.agents[agent_id].refcount += 1;
        }
        info.used = Some(now);
        info.generation = self.generation;
        Ok(())
    }

    fn export_item(&self, item: &ItemRequest) -> ExportItem {
        ExportItem {
            itemid: item.request.itemid,
            key: item.name.clone(),
            params: item.params.clone(),
            delay: item.request.delay.clone(),
            last_logsize: item.request.last_logsize,
            mtime: item.request.mtime,
            sink: self.sink.clone(),
            global_regexp: self.global_regexp.clone(),
            refresh_unsupported: self.refresh_unsupported,
            failed: false,
            updated: self.generation,
        }
    }

    fn add_exporter(
        &mut self,
        pool: &mut AgentPool,
        agent_id: AgentId,
        item: &ItemRequest,
        now: DateTime<Utc>,
    ) -> Result<(), ItemError> {
        let itemid = item.request.itemid;
        if let Some(&task_id) = self.exporters.get(&itemid) {
            match pool.tasks.get_mut(task_id) {
                Some(task) if task.agent == agent_id && task.active => {
                    let TaskKind::Exporter(export) = &mut task.kind else {
                        return Ok(());
                    };
                    if export.updated == self.generation {
                        // duplicate item id within one update
                        return Ok(());
                    }
                    export.updated = self.generation;
                    export.sink = self.sink.clone();
                    export.global_regexp = self.global_regexp.clone();
                    export.refresh_unsupported = self.refresh_unsupported;
                    export.last_logsize = item.request.last_logsize;
                    export.mtime = item.request.mtime;
                    if task.update_item(item.name.clone(), item.params.clone(), &item.request.delay)? {
                        task.reschedule(now)?;
                        pool.requeue(task_id);
                    }
                    return Ok(());
                }
                // the item moved to another plugin
                _ => {
                    pool.deactivate(task_id);
                    self.exporters.remove(&itemid);
                }
            }
        }

        let export = self.export_item(item);
        let task_id = schedule(pool, Task::new(agent_id, self.id, TaskKind::Exporter(export)), now)?;
        self.exporters.insert(itemid, task_id);
        Ok(())
    }

    fn add_watched(
        &mut self,
        pool: &mut AgentPool,
        agent_id: AgentId,
        request: Request,
        now: DateTime<Utc>,
    ) -> Result<(), ItemError> {
        let generation = self.generation;
        let info = self.plugins_info.entry(agent_id).or_default();
        if let Some((task_id, created)) = info.watcher {
            if let Some(task) = pool.tasks.get_mut(task_id).filter(|t| t.is_pending()) {
                if created == generation {
                    if let TaskKind::Watcher { requests, .. } = &mut task.kind {
                        requests.push(request);
                        return Ok(());
                    }
                }
                // superseded by this update
                pool.deactivate(task_id);
            }
        }

        let task = Task::new(
            agent_id,
            self.id,
            TaskKind::Watcher {
                requests: vec![request],
                sink: self.sink.clone(),
                global_regexp: self.global_regexp.clone(),
            },
        );
        let task_id = schedule(pool, task, now)?;
        if let Some(info) = self.plugins_info.get_mut(&agent_id) {
            info.watcher = Some((task_id, generation));
        }
        Ok(())
    }

    /// Drops exporters and plugins this client no longer references.
    ///
    /// Regular clients release everything not referenced by the current
    /// update generation. The direct client releases plugins idle for longer
    /// than `direct_expiry`.
    /// Returns the agents released by this client.
    pub fn cleanup(
        &mut self,
        pool: &mut AgentPool,
        now: DateTime<Utc>,
        direct_expiry: Duration,
    ) -> Vec<AgentId> {
        if !self.is_direct() {
            let stale: Vec<u64> = self
                .exporters
                .iter()
                .filter(|(_, task_id)| match pool.tasks.get(**task_id) {
                    Some(Task { kind: TaskKind::Exporter(export), active: true, .. }) => {
                        export.updated != self.generation
                    }
                    _ => true,
                })
                .map(|(itemid, _)| *itemid)
                .collect();
            for itemid in stale {
                if let Some(task_id) = self.exporters.remove(&itemid) {
                    pool.deactivate(task_id);
                }
            }
        }

        let expiry = now - direct_expiry;
        let generation = self.generation;
        let direct = self.is_direct();
        let expired: Vec<AgentId> = self
            .plugins_info
            .iter()
            .filter(|(_, info)| {
                if direct {
                    info.used.map_or(true, |used| used < expiry)
                } else {
                    info.generation != generation
                }
            })
            .map(|(agent_id, _)| *agent_id)
            .collect();

        for agent_id in &expired {
            self.plugins_info.remove(agent_id);
            if pool.agents[*agent_id].has(Capabilities::WATCHER) {
                // an empty watch lets the plugin release resources held for this client
                let task = Task::new(
                    *agent_id,
                    self.id,
                    TaskKind::Watcher {
                        requests: Vec::new(),
                        sink: self.sink.clone(),
                        global_regexp: self.global_regexp.clone(),
                    },
                );
                // one-shot reschedule never fails
                let _ = schedule(pool, task, now);
            }
            let agent = &mut pool.agents[*agent_id];
            agent.refcount = agent.refcount.saturating_sub(1);
            debug!(plugin = %agent.name(), client_id = self.id, refcount = agent.refcount, "Released plugin.");
        }
        expired
    }
}

/// Computes the first schedule of a new task and hands it to the pool.
fn schedule(pool: &mut AgentPool, mut task: Task, now: DateTime<Utc>) -> Result<TaskId, ItemError> {
    task.reschedule(now)?;
    Ok(pool.add(task))
}
