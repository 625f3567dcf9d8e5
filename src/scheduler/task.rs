//! Scheduled units of work.

use crate::core::{Request, Sink};
use crate::expression::GlobalRegexp;
use crate::interval::{next_check, next_period, parse_delay, IntervalError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub type TaskId = u64;
pub type AgentId = usize;

/// Ordering key of a pending task inside its agent queue.
///
/// Earlier scheduled time first, then lower kind priority, then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
    pub scheduled: DateTime<Utc>,
    pub priority: u8,
    pub seq: u64,
}

/// A requested item bound to an exporter plugin.
#[derive(Clone)]
pub struct ExportItem {
    pub itemid: u64,
    pub key: String,
    pub params: Vec<String>,
    pub delay: String,
    pub last_logsize: Option<u64>,
    pub mtime: Option<i64>,
    pub sink: Sink,
    pub global_regexp: Arc<GlobalRegexp>,
    pub refresh_unsupported: i64,
    /// The last collection ended with an error.
    pub failed: bool,
    /// Generation of the update request that last touched this item.
    pub updated: u64,
}

pub enum TaskKind {
    Configurator(serde_json::Value),
    Starter,
    Collector { period: i64 },
    Watcher {
        requests: Vec<Request>,
        sink: Sink,
        global_regexp: Arc<GlobalRegexp>,
    },
    Exporter(ExportItem),
    /// A one-shot export on behalf of a direct request.
    DirectExporter(ExportItem),
    Stopper,
}

impl TaskKind {
    /// Tie-break priority for tasks due at the same time.
    pub fn priority(&self) -> u8 {
        match self {
            TaskKind::Configurator(_) => 0,
            TaskKind::Starter => 1,
            TaskKind::Collector { .. } => 2,
            TaskKind::Watcher { .. } => 3,
            TaskKind::Exporter(_) | TaskKind::DirectExporter(_) => 4,
            TaskKind::Stopper => 5,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, TaskKind::Collector { .. } | TaskKind::Exporter(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Configurator(_) => "configurator",
            TaskKind::Starter => "starter",
            TaskKind::Collector { .. } => "collector",
            TaskKind::Watcher { .. } => "watcher",
            TaskKind::Exporter(_) => "exporter",
            TaskKind::DirectExporter(_) => "direct exporter",
            TaskKind::Stopper => "stopper",
        }
    }
}

pub struct Task {
    pub id: TaskId,
    pub agent: AgentId,
    pub client_id: u64,
    pub scheduled: DateTime<Utc>,
    /// Cleared when the task must not be rescheduled again.
    pub active: bool,
    /// Set while the task sits in its agent queue.
    pub queue_key: Option<QueueKey>,
    pub running: bool,
    pub kind: TaskKind,
}

impl Task {
    pub fn new(agent: AgentId, client_id: u64, kind: TaskKind) -> Self {
        Self {
            id: 0,
            agent,
            client_id,
            scheduled: DateTime::<Utc>::MIN_UTC,
            active: true,
            queue_key: None,
            running: false,
            kind,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.queue_key.is_some()
    }

    /// Computes the next scheduled time relative to `now`.
    ///
    /// One-shot tasks are due immediately. Collectors fire on aligned period
    /// boundaries and exporters on their item spread check time.
    pub fn reschedule(&mut self, now: DateTime<Utc>) -> Result<(), IntervalError> {
        self.scheduled = match &self.kind {
            TaskKind::Collector { period } => next_period(*period, now),
            TaskKind::Exporter(item) => {
                let delay = if item.failed && item.refresh_unsupported > 0 {
                    item.refresh_unsupported
                } else {
                    parse_delay(&item.delay)?
                };
                next_check(item.itemid, delay, now)
            }
            _ => now,
        };
        Ok(())
    }

    /// Rebinds an exporter task to a changed key or delay.
    pub fn update_item(
        &mut self,
        key: String,
        params: Vec<String>,
        delay: &str,
    ) -> Result<bool, IntervalError> {
        let TaskKind::Exporter(item) = &mut self.kind else {
            return Ok(false);
        };
        if item.key == key && item.params == params && item.delay == delay {
            return Ok(false);
        }
        parse_delay(delay)?;
        item.delay = delay.to_string();
        item.key = key;
        item.params = params;
        Ok(true)
    }
}

/// Owner of every live task, keyed by id.
#[derive(Default)]
pub struct TaskTable {
    tasks: HashMap<TaskId, Task>,
    next_id: TaskId,
}

impl TaskTable {
    pub fn insert(&mut self, mut task: Task) -> TaskId {
        self.next_id += 1;
        task.id = self.next_id;
        self.tasks.insert(task.id, task);
        self.next_id
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }
}
