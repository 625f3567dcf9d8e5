//! Runtime state of a single plugin.

use super::task::{AgentId, QueueKey, Task, TaskId};
use crate::plugin::{Capabilities, PluginDescriptor};
use std::collections::BTreeMap;

/// A plugin together with its pending tasks and concurrency bookkeeping.
pub struct PluginAgent {
    pub id: AgentId,
    pub descriptor: PluginDescriptor,
    /// Plugin specific options handed to configurator tasks.
    pub options: serde_json::Value,
    tasks: BTreeMap<QueueKey, TaskId>,
    next_seq: u64,
    used_capacity: usize,
    max_capacity: usize,
    /// Number of clients currently using this plugin.
    pub refcount: usize,
    /// Position in the scheduler queue, maintained by the queue itself.
    pub(crate) heap_index: Option<usize>,
}

impl PluginAgent {
    pub fn new(
        id: AgentId,
        descriptor: PluginDescriptor,
        max_capacity: usize,
        options: serde_json::Value,
    ) -> Self {
        Self {
            id,
            descriptor,
            options,
            tasks: BTreeMap::new(),
            next_seq: 0,
            used_capacity: 0,
            max_capacity,
            refcount: 0,
            heap_index: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn has(&self, capability: Capabilities) -> bool {
        self.descriptor.has(capability)
    }

    /// Adds a task to the pending queue, keyed by its current schedule.
    pub fn enqueue_task(&mut self, task: &mut Task) {
        assert!(
            task.queue_key.is_none(),
            "task {} of plugin {} is already queued",
            task.id,
            self.name()
        );
        self.next_seq += 1;
        let key = QueueKey {
            scheduled: task.scheduled,
            priority: task.kind.priority(),
            seq: self.next_seq,
        };
        self.tasks.insert(key, task.id);
        task.queue_key = Some(key);
    }

    /// Removes a pending task. Returns `false` if it was not queued here.
    pub fn remove_task(&mut self, task: &mut Task) -> bool {
        match task.queue_key.take() {
            Some(key) => self.tasks.remove(&key).is_some(),
            None => false,
        }
    }

    /// The earliest pending task, without removing it.
    pub fn peek_task(&self) -> Option<(QueueKey, TaskId)> {
        self.tasks.first_key_value().map(|(k, id)| (*k, *id))
    }

    /// Removes and returns the earliest pending task id. The caller must clear
    /// the task's queue key.
    pub fn pop_task(&mut self) -> Option<TaskId> {
        self.tasks.pop_first().map(|(_, id)| id)
    }

    /// Removes every pending task id, earliest first.
    pub fn drain_tasks(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.tasks).into_values().collect()
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.used_capacity < self.max_capacity
    }

    pub fn used_capacity(&self) -> usize {
        self.used_capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn reserve_capacity(&mut self) {
        if self.used_capacity >= self.max_capacity {
            panic!(
                "plugin {} capacity overflow: {}/{} already in use",
                self.name(),
                self.used_capacity,
                self.max_capacity
            );
        }
        self.used_capacity += 1;
    }

    pub fn release_capacity(&mut self) {
        if self.used_capacity == 0 {
            panic!("plugin {} released more capacity than it reserved", self.name());
        }
        self.used_capacity -= 1;
    }

    /// The plugin is used by at least one client.
    pub fn is_active(&self) -> bool {
        self.refcount > 0
    }

    pub fn is_queued(&self) -> bool {
        self.heap_index.is_some()
    }
}
