//! The scheduler control loop.
//!
//! [`Manager`] owns all scheduling state. Its methods take the current time
//! explicitly and never block; [`Manager::run`] wires them to the mailbox and
//! the one second ticker and spawns the jobs they produce.

use super::agent::PluginAgent;
use super::client::{Client, ItemRequest};
use super::pool::AgentPool;
use super::task::{AgentId, Task, TaskKind};
use super::worker::{Job, TaskOutcome};
use super::{
    ItemError, Message, QueryRequest, SchedulerError, SchedulerHandle, UpdateRequest,
    DIRECT_CLIENT_ID,
};
use crate::alias::AliasManager;
use crate::config::{Config, PluginConfig, SchedulerConfig};
use crate::core::TaskResult;
use crate::itemkey::parse_key;
use crate::plugin::{Capabilities, PluginDescriptor, PluginRegistry, DEFAULT_CAPACITY};
use crate::status::Metrics;
use crate::task_manager::TaskManager;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    /// Remaining ticks before the loop exits regardless of running tasks.
    Draining(u64),
}

/// Whether the control loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

pub struct Manager {
    pool: AgentPool,
    /// Metric key to the agent serving it.
    keys: HashMap<String, AgentId>,
    clients: HashMap<u64, Client>,
    aliases: AliasManager,
    active_tasks: usize,
    state: RunState,
    last_tick: Option<DateTime<Utc>>,
    last_cleanup: Option<DateTime<Utc>>,
    config: SchedulerConfig,
    metrics: Metrics,
}

impl Manager {
    /// Builds the manager from the plugin registry.
    ///
    /// Validates every configurable plugin's options and resolves each
    /// plugin's effective capacity.
    #[instrument(skip_all)]
    pub fn new(
        registry: &PluginRegistry,
        config: &Config,
        metrics: Metrics,
    ) -> Result<Self, SchedulerError> {
        let aliases = AliasManager::new(&config.aliases)?;

        let mut agents = Vec::new();
        let mut by_name: HashMap<String, AgentId> = HashMap::new();
        // the registry yields plugins ordered by name
        for descriptor in registry.plugins() {
            let options = config.plugin_options(&descriptor.name);
            if descriptor.has(Capabilities::CONFIGURATOR) {
                descriptor.plugin.validate(&options).map_err(|e| {
                    SchedulerError::InvalidPluginConfig(descriptor.name.clone(), e)
                })?;
            }
            let capacity = resolve_capacity(descriptor, config.plugins.get(&descriptor.name));
            info!(
                "using plugin '{}' providing following interfaces: {}",
                descriptor.name,
                descriptor.capabilities.describe()
            );
            let id = agents.len();
            by_name.insert(descriptor.name.clone(), id);
            agents.push(PluginAgent::new(id, descriptor.clone(), capacity, options));
        }

        let keys = registry
            .metrics()
            .filter_map(|m| by_name.get(m.plugin.name()).map(|id| (m.key.clone(), *id)))
            .collect();

        Ok(Self {
            pool: AgentPool::new(agents),
            keys,
            clients: HashMap::new(),
            aliases,
            active_tasks: 0,
            state: RunState::Running,
            last_tick: None,
            last_cleanup: None,
            config: config.scheduler.clone(),
            metrics,
        })
    }

    /// Spawns the control loop on the task manager and returns its handle.
    pub fn start(self, task_manager: &TaskManager) -> SchedulerHandle {
        let (tx, rx) = async_channel::bounded(self.config.mailbox_capacity.max(1));
        let handle = SchedulerHandle::new(tx);
        let shutdown_rx = task_manager.get_shutdown_rx();
        task_manager.spawn("Scheduler", self.run(rx, handle.clone(), shutdown_rx));
        handle
    }

    /// Runs the control loop until shutdown completes.
    pub async fn run(
        mut self,
        rx: async_channel::Receiver<Message>,
        handle: SchedulerHandle,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(plugins = self.pool.agents.len(), keys = self.keys.len(), "Scheduler started.");

        // align ticks to whole seconds so every task due in a second is seen by its tick
        let now = Utc::now();
        self.last_tick = Some(now);
        self.last_cleanup = Some(now);
        let to_next_second = 1_000_000_000 - u64::from(now.timestamp_subsec_nanos() % 1_000_000_000);
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + Duration::from_nanos(to_next_second),
            Duration::from_secs(1),
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let (jobs, control) = tokio::select! {
                biased;
                _ = shutdown_rx.changed(), if !self.is_draining() => {
                    info!("Shutdown signal received, draining scheduler.");
                    self.begin_shutdown(Utc::now())
                }
                _ = ticker.tick() => self.tick(Utc::now()),
                message = rx.recv() => match message {
                    Ok(message) => self.handle_message(message),
                    Err(_) => (Vec::new(), Control::Exit),
                },
            };
            self.spawn_jobs(jobs, &handle);
            self.report();
            if control == Control::Exit {
                break;
            }
        }

        rx.close();
        info!(active_tasks = self.active_tasks, "Scheduler stopped.");
    }

    fn handle_message(&mut self, message: Message) -> (Vec<Job>, Control) {
        match message {
            Message::Update(update) => {
                let now = Utc::now();
                self.process_update(update, now);
                (self.process_queue(now), Control::Continue)
            }
            Message::Finish(outcome) => {
                let now = Utc::now();
                self.process_finish(outcome, now);
                if self.is_draining() && self.is_idle() {
                    return (Vec::new(), Control::Exit);
                }
                (self.process_queue(now), Control::Continue)
            }
            Message::Query(QueryRequest { command, reply }) => {
                let response = self
                    .process_query(&command)
                    .unwrap_or_else(|e| format!("cannot process request: {}", e));
                if reply.send(response).is_err() {
                    debug!("Query requester went away before the reply.");
                }
                (Vec::new(), Control::Continue)
            }
            Message::Shutdown => {
                if self.is_draining() {
                    return (Vec::new(), Control::Continue);
                }
                info!("Stop requested, draining scheduler.");
                self.begin_shutdown(Utc::now())
            }
        }
    }

    fn spawn_jobs(&self, jobs: Vec<Job>, handle: &SchedulerHandle) {
        for job in jobs {
            self.metrics.increment_dispatched(&job.plugin_name);
            let handle = handle.clone();
            tokio::spawn(async move {
                let outcome = job.run().await;
                handle.finish_task(outcome).await;
            });
        }
    }

    fn report(&self) {
        self.metrics.active_tasks.set(self.active_tasks as f64);
        self.metrics.queued_plugins.set(self.pool.queue.len() as f64);
        self.metrics.clients.set(self.clients.len() as f64);
    }

    fn is_draining(&self) -> bool {
        matches!(self.state, RunState::Draining(_))
    }

    fn is_idle(&self) -> bool {
        self.active_tasks + self.pool.queue.len() == 0
    }

    /// Applies a requester's full item set.
    pub fn process_update(&mut self, update: UpdateRequest, now: DateTime<Utc>) {
        debug!(client_id = update.client_id, requests = update.requests.len(), "Processing update request.");

        // direct checks fail right away and batches are ignored while draining
        if self.is_draining() {
            if update.client_id == DIRECT_CLIENT_ID {
                match update.requests.as_slice() {
                    [request] => update.sink.write(TaskResult::error(
                        request.itemid,
                        ItemError::ShuttingDown,
                        now,
                    )),
                    requests => warn!(
                        client_id = update.client_id,
                        requests = requests.len(),
                        "Direct checks can contain only a single request."
                    ),
                }
            }
            return;
        }

        if !self.clients.contains_key(&update.client_id) {
            if update.requests.is_empty() {
                debug!(client_id = update.client_id, "Skipping empty update for unregistered client.");
                return;
            }
            debug!(client_id = update.client_id, "Registering new client.");
            self.clients
                .insert(update.client_id, Client::new(update.client_id, update.sink.clone()));
        }
        let Some(client) = self.clients.get_mut(&update.client_id) else {
            return;
        };

        client.begin_update();
        client.sink = update.sink.clone();
        client.refresh_unsupported = update.refresh_unsupported;
        if let Err(e) = client.update_expressions(update.expressions) {
            warn!(client_id = client.id, error = %e, "Cannot update global regular expressions.");
        }

        for mut request in update.requests {
            request.key = self.aliases.get(&request.key);
            let itemid = request.itemid;
            let key = request.key.clone();

            let result = parse_key(&request.key)
                .map_err(ItemError::from)
                .and_then(|(name, params)| {
                    let agent = *self
                        .keys
                        .get(&name)
                        .ok_or_else(|| ItemError::UnknownMetric(name.clone()))?;
                    let item = ItemRequest {
                        request,
                        name,
                        params,
                    };
                    client.add_request(&mut self.pool, agent, item, now)
                });

            if let Err(e) = result {
                if !client.is_direct() {
                    if let Some(task_id) = client.exporters.remove(&itemid) {
                        debug!(client_id = client.id, itemid, error = %e, "Deactivating exporter task after error.");
                        self.pool.deactivate(task_id);
                    }
                }
                debug!(client_id = client.id, itemid, key = %key, error = %e, "Cannot monitor metric.");
                self.metrics.item_errors_total.increment(1);
                update.sink.write(TaskResult::error(itemid, e, now));
            }
        }

        self.cleanup_client(update.client_id, now);
    }

    /// Deactivates plugins the client no longer uses.
    ///
    /// Called after every update and periodically for the direct client.
    pub fn cleanup_client(&mut self, client_id: u64, now: DateTime<Utc>) {
        let expiry = ChronoDuration::seconds(self.config.cleanup_interval_seconds);
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        let released = client.cleanup(&mut self.pool, now, expiry);

        for agent_id in released {
            if self.pool.agents[agent_id].refcount != 0 {
                continue;
            }
            debug!(client_id, plugin = %self.pool.agents[agent_id].name(), "Deactivating unused plugin.");

            let recurring: Vec<_> = self
                .pool
                .tasks
                .values()
                .filter(|t| t.agent == agent_id && t.kind.is_recurring())
                .map(|t| t.id)
                .collect();
            for task_id in recurring {
                self.pool.deactivate(task_id);
            }

            if self.pool.agents[agent_id].has(Capabilities::RUNNER) {
                let mut stopper = Task::new(agent_id, client_id, TaskKind::Stopper);
                stopper.scheduled = now;
                self.pool.add(stopper);
                debug!(client_id, plugin = %self.pool.agents[agent_id].name(), "Created stopper task.");
            }
        }
    }

    /// Dispatches every due task whose plugin has free capacity.
    pub fn process_queue(&mut self, now: DateTime<Utc>) -> Vec<Job> {
        let seconds = now.timestamp();
        let mut jobs = Vec::new();

        while let Some(agent_id) = self.pool.queue.peek() {
            let Some((key, _)) = self.pool.agents[agent_id].peek_task() else {
                // agents without tasks do not belong in the queue
                self.pool.queue.pop(&mut self.pool.agents);
                continue;
            };
            if key.scheduled.timestamp() > seconds {
                break;
            }

            self.pool.queue.pop(&mut self.pool.agents);
            if !self.pool.agents[agent_id].has_capacity() {
                // kept out of the queue until a running task releases capacity
                continue;
            }

            let Some(task_id) = self.pool.take_next(agent_id) else {
                continue;
            };
            self.active_tasks += 1;
            let agent = &mut self.pool.agents[agent_id];
            agent.reserve_capacity();
            if let Some(task) = self.pool.tasks.get(task_id) {
                debug!(plugin = %agent.name(), task_id, kind = task.kind.name(), client_id = task.client_id, "Dispatching task.");
                jobs.push(Job::new(task, agent.name(), agent.descriptor.plugin.clone()));
            }

            // back in the queue only while it can take more work
            self.pool.sync(agent_id);
        }
        jobs
    }

    /// Releases a finished task's capacity and reschedules it when it recurs.
    pub fn process_finish(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) {
        self.metrics.tasks_finished_total.increment(1);
        self.active_tasks = match self.active_tasks.checked_sub(1) {
            Some(n) => n,
            None => panic!("task {} finished while no task was running", outcome.task_id),
        };
        let Some(task) = self.pool.tasks.get_mut(outcome.task_id) else {
            panic!("finished task {} is unknown to the scheduler", outcome.task_id);
        };
        task.running = false;
        if let TaskKind::Exporter(item) = &mut task.kind {
            item.failed = outcome.failed;
        }

        let agent_id = task.agent;
        let agent = &mut self.pool.agents[agent_id];
        agent.release_capacity();

        if agent.is_active() && task.active && task.kind.is_recurring() {
            match task.reschedule(now) {
                Ok(()) => self.pool.enqueue(outcome.task_id),
                Err(e) => {
                    warn!(plugin = %agent.name(), task_id = outcome.task_id, error = %e, "Cannot reschedule task.");
                    self.pool.tasks.remove(outcome.task_id);
                }
            }
        } else {
            self.pool.tasks.remove(outcome.task_id);
        }
        self.pool.sync(agent_id);
    }

    /// Reschedules every pending task against `now` and rebuilds the queue.
    pub fn reschedule_queue(&mut self, now: DateTime<Utc>) {
        for agent_id in 0..self.pool.agents.len() {
            for task_id in self.pool.agents[agent_id].drain_tasks() {
                let Some(task) = self.pool.tasks.get_mut(task_id) else {
                    continue;
                };
                task.queue_key = None;
                match task.reschedule(now) {
                    Ok(()) => self.pool.agents[agent_id].enqueue_task(task),
                    Err(e) => {
                        warn!(task_id, error = %e, "Dropping task that cannot be rescheduled.");
                        self.pool.tasks.remove(task_id);
                    }
                }
            }
        }
        self.pool.rebuild_queue();
    }

    /// Runs the per-second housekeeping and dispatch.
    pub fn tick(&mut self, now: DateTime<Utc>) -> (Vec<Job>, Control) {
        if let Some(last) = self.last_tick {
            let diff = (now - last).num_seconds().abs();
            if diff >= self.config.clock_skew_tolerance_seconds {
                warn!(seconds = diff, "Detected time difference between queue checks, rescheduling tasks.");
                self.metrics.clock_skew_total.increment(1);
                self.reschedule_queue(now);
            }
        }
        self.last_tick = Some(now);
        let jobs = self.process_queue(now);

        match self.state {
            RunState::Draining(seconds) => {
                let left = seconds.saturating_sub(1);
                self.state = RunState::Draining(left);
                if left == 0 {
                    warn!(active_tasks = self.active_tasks, "Shutdown timeout expired, abandoning running tasks.");
                    return (jobs, Control::Exit);
                }
            }
            RunState::Running => {
                let last = *self.last_cleanup.get_or_insert(now);
                if (now - last).num_seconds() >= self.config.cleanup_interval_seconds {
                    self.cleanup_clients(now);
                    self.last_cleanup = Some(now);
                }
            }
        }
        (jobs, Control::Continue)
    }

    fn cleanup_clients(&mut self, now: DateTime<Utc>) {
        if self.clients.contains_key(&DIRECT_CLIENT_ID) {
            self.cleanup_client(DIRECT_CLIENT_ID, now);
        }
        self.clients.retain(|id, client| {
            let keep = !client.plugins_info.is_empty();
            if !keep {
                debug!(client_id = *id, "Removing inactive client.");
            }
            keep
        });
    }

    /// Drops all pending work and queues final stopper tasks.
    pub fn begin_shutdown(&mut self, now: DateTime<Utc>) -> (Vec<Job>, Control) {
        self.state = RunState::Draining(self.config.shutdown_timeout_seconds);
        self.pool.queue.clear(&mut self.pool.agents);

        for agent_id in 0..self.pool.agents.len() {
            if self.pool.agents[agent_id].refcount == 0 {
                continue;
            }
            for task_id in self.pool.agents[agent_id].drain_tasks() {
                self.pool.tasks.remove(task_id);
            }
            // running tasks are dropped when they finish
            self.pool.agents[agent_id].refcount = 0;
            if self.pool.agents[agent_id].has(Capabilities::RUNNER) {
                let mut stopper = Task::new(agent_id, DIRECT_CLIENT_ID, TaskKind::Stopper);
                stopper.scheduled = now;
                self.pool.tasks.insert(stopper);
                debug!(plugin = %self.pool.agents[agent_id].name(), "Created final stopper task.");
            }
        }
        // pick up the stoppers and anything left by earlier deactivations
        let stoppers: Vec<_> = self
            .pool
            .tasks
            .values()
            .filter(|t| !t.running && !t.is_pending())
            .map(|t| t.id)
            .collect();
        for task_id in stoppers {
            if let Some(task) = self.pool.tasks.get_mut(task_id) {
                let agent = task.agent;
                self.pool.agents[agent].enqueue_task(task);
            }
        }
        self.pool.rebuild_queue();

        if self.shutdown_timed_out() || self.is_idle() {
            return (Vec::new(), Control::Exit);
        }
        (self.process_queue(now), Control::Continue)
    }

    fn shutdown_timed_out(&self) -> bool {
        self.state == RunState::Draining(0)
    }

    /// Answers a diagnostic query.
    pub fn process_query(&self, command: &str) -> Result<String, String> {
        match command {
            "metrics" => {
                let mut agents: Vec<&PluginAgent> = self.pool.agents.iter().collect();
                agents.sort_by(|a, b| a.name().cmp(b.name()));
                let mut out = String::new();
                for agent in agents {
                    let _ = writeln!(out, "[{}]", agent.name());
                    let _ = writeln!(out, "active: {}", agent.is_active());
                    let _ = writeln!(out, "capacity: {}/{}", agent.used_capacity(), agent.max_capacity());
                    let _ = writeln!(out, "tasks: {}", agent.pending());
                }
                let _ = write!(out, "active tasks: {}", self.active_tasks);
                Ok(out)
            }
            _ => Err(format!("unknown request \"{}\"", command)),
        }
    }
}

/// Effective concurrency limit of a plugin.
fn resolve_capacity(descriptor: &PluginDescriptor, config: Option<&PluginConfig>) -> usize {
    let declared = descriptor.capacity;
    let mut capacity = declared;
    match config.and_then(|c| c.capacity.as_ref()).map(|v| (v, v.as_i64())) {
        None | Some((_, Some(0))) => {}
        Some((_, Some(configured))) if configured < 0 => {
            warn!(plugin = %descriptor.name, configured, "Invalid plugin capacity, using the default of {}.", DEFAULT_CAPACITY);
            capacity = DEFAULT_CAPACITY;
        }
        Some((_, Some(configured))) => capacity = usize::try_from(configured).unwrap_or(usize::MAX),
        Some((value, None)) => {
            warn!(plugin = %descriptor.name, %value, "Invalid plugin capacity, using the default of {}.", DEFAULT_CAPACITY);
            capacity = DEFAULT_CAPACITY;
        }
    }
    if capacity > declared {
        warn!(
            "lowering the plugin {} capacity to {} as the configured capacity {} exceeds limits",
            descriptor.name, declared, capacity
        );
        capacity = declared;
    }
    capacity.max(1)
}
