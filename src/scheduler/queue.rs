//! Priority queue of plugin agents.
//!
//! Agents are ordered by the scheduled time of their earliest pending task.
//! Each agent records its own position so that it can be repositioned in
//! place whenever its top task changes.

use super::agent::PluginAgent;
use super::task::AgentId;

#[derive(Debug, Default)]
pub struct PluginQueue {
    heap: Vec<AgentId>,
}

impl PluginQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn peek(&self) -> Option<AgentId> {
        self.heap.first().copied()
    }

    pub fn push(&mut self, agents: &mut [PluginAgent], id: AgentId) {
        assert!(
            agents[id].heap_index.is_none(),
            "plugin {} is already queued",
            agents[id].name()
        );
        let index = self.heap.len();
        self.heap.push(id);
        agents[id].heap_index = Some(index);
        self.sift_up(agents, index);
    }

    pub fn pop(&mut self, agents: &mut [PluginAgent]) -> Option<AgentId> {
        let id = self.peek()?;
        self.remove(agents, id);
        Some(id)
    }

    /// Restores the heap order after the agent's top task changed.
    pub fn update(&mut self, agents: &mut [PluginAgent], id: AgentId) {
        if let Some(index) = agents[id].heap_index {
            if !self.sift_up(agents, index) {
                self.sift_down(agents, index);
            }
        }
    }

    pub fn remove(&mut self, agents: &mut [PluginAgent], id: AgentId) {
        let Some(index) = agents[id].heap_index.take() else {
            return;
        };
        let last = self.heap.len() - 1;
        if index != last {
            self.heap.swap(index, last);
            agents[self.heap[index]].heap_index = Some(index);
        }
        self.heap.pop();
        if index < self.heap.len() && !self.sift_up(agents, index) {
            self.sift_down(agents, index);
        }
    }

    pub fn clear(&mut self, agents: &mut [PluginAgent]) {
        for id in self.heap.drain(..) {
            agents[id].heap_index = None;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.heap.iter().copied()
    }

    fn less(agents: &[PluginAgent], a: AgentId, b: AgentId) -> bool {
        // agents without pending tasks sort last
        match (agents[a].peek_task(), agents[b].peek_task()) {
            (Some((ka, _)), Some((kb, _))) => (ka.scheduled, ka.priority) < (kb.scheduled, kb.priority),
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn swap(&mut self, agents: &mut [PluginAgent], i: usize, j: usize) {
        self.heap.swap(i, j);
        agents[self.heap[i]].heap_index = Some(i);
        agents[self.heap[j]].heap_index = Some(j);
    }

    fn sift_up(&mut self, agents: &mut [PluginAgent], mut index: usize) -> bool {
        let start = index;
        while index > 0 {
            let parent = (index - 1) / 2;
            if !Self::less(agents, self.heap[index], self.heap[parent]) {
                break;
            }
            self.swap(agents, index, parent);
            index = parent;
        }
        index != start
    }

    fn sift_down(&mut self, agents: &mut [PluginAgent], mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < len && Self::less(agents, self.heap[right], self.heap[left]) {
                child = right;
            }
            if !Self::less(agents, self.heap[child], self.heap[index]) {
                break;
            }
            self.swap(agents, index, child);
            index = child;
        }
    }
}
