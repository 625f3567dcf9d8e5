//! Plugin agents, their tasks and the queue that orders them.
//!
//! Every change to an agent's pending tasks goes through [`AgentPool`] so
//! that the agent's position in the scheduler queue stays consistent:
//! a queued agent always has pending tasks, and an agent with pending tasks
//! and free capacity is always queued.

use super::agent::PluginAgent;
use super::queue::PluginQueue;
use super::task::{AgentId, Task, TaskId, TaskTable};

#[derive(Default)]
pub struct AgentPool {
    pub agents: Vec<PluginAgent>,
    pub queue: PluginQueue,
    pub tasks: TaskTable,
}

impl AgentPool {
    pub fn new(agents: Vec<PluginAgent>) -> Self {
        Self {
            agents,
            queue: PluginQueue::new(),
            tasks: TaskTable::default(),
        }
    }

    /// Takes ownership of a scheduled task and queues it on its agent.
    pub fn add(&mut self, task: Task) -> TaskId {
        let id = self.tasks.insert(task);
        self.enqueue(id);
        id
    }

    /// Queues an owned task on its agent using its current schedule.
    pub fn enqueue(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        let agent = task.agent;
        self.agents[agent].enqueue_task(task);
        self.sync(agent);
    }

    /// Takes a task out of its agent queue if it is pending there.
    pub fn dequeue(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        let agent = task.agent;
        if self.agents[agent].remove_task(task) {
            self.sync(agent);
        }
    }

    /// Requeues a pending task after its schedule changed.
    pub fn requeue(&mut self, id: TaskId) {
        let pending = self.tasks.get(id).is_some_and(Task::is_pending);
        if pending {
            self.dequeue(id);
            self.enqueue(id);
        }
    }

    /// Stops a task from ever being rescheduled.
    ///
    /// A pending task is dropped right away. A running task is dropped when
    /// it finishes.
    pub fn deactivate(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        task.active = false;
        if task.running {
            return;
        }
        self.dequeue(id);
        self.tasks.remove(id);
    }

    /// Pops the earliest pending task of an agent, marking it as running.
    pub fn take_next(&mut self, agent: AgentId) -> Option<TaskId> {
        let id = self.agents[agent].pop_task()?;
        if let Some(task) = self.tasks.get_mut(id) {
            task.queue_key = None;
            task.running = true;
        }
        Some(id)
    }

    /// Restores the agent's queue position after its tasks or capacity changed.
    pub fn sync(&mut self, id: AgentId) {
        let agent = &self.agents[id];
        match (agent.is_queued(), agent.has_tasks() && agent.has_capacity()) {
            (true, true) => self.queue.update(&mut self.agents, id),
            (true, false) => self.queue.remove(&mut self.agents, id),
            (false, true) => self.queue.push(&mut self.agents, id),
            (false, false) => {}
        }
    }

    /// Rebuilds the queue from scratch out of every eligible agent.
    pub fn rebuild_queue(&mut self) {
        self.queue.clear(&mut self.agents);
        for id in 0..self.agents.len() {
            self.sync(id);
        }
    }

    /// Checks the queue membership invariant, returning a description of the
    /// first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        for agent in &self.agents {
            if agent.is_queued() && !agent.has_tasks() {
                return Err(format!("plugin {} is queued without tasks", agent.name()));
            }
            if !agent.is_queued() && agent.has_tasks() && agent.has_capacity() {
                return Err(format!("plugin {} has runnable tasks but is not queued", agent.name()));
            }
        }
        for task in self.tasks.values() {
            if task.is_pending() == task.running {
                return Err(format!("task {} is both or neither pending and running", task.id));
            }
        }
        Ok(())
    }
}
