//! A result sink that records everything written to it.

use metricwatch::core::{ResultWriter, TaskResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
pub struct CollectingWriter {
    results: Mutex<Vec<TaskResult>>,
    notify: Notify,
    slots: Option<usize>,
}

impl CollectingWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink that reports no free slots, so regular exports are skipped.
    pub fn full() -> Arc<Self> {
        Arc::new(Self {
            slots: Some(0),
            ..Default::default()
        })
    }

    pub fn results(&self) -> Vec<TaskResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn for_item(&self, itemid: u64) -> Vec<TaskResult> {
        self.results()
            .into_iter()
            .filter(|r| r.itemid == itemid)
            .collect()
    }

    /// Waits until the first result for `itemid` was written.
    pub async fn wait_for_item(&self, itemid: u64, timeout: Duration) -> TaskResult {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(result) = self.for_item(itemid).into_iter().next() {
                return result;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!("timed out waiting for item {itemid}: {:?}", self.results());
            }
        }
    }

    /// Waits until at least `count` results were written.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<TaskResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            let results = self.results();
            if results.len() >= count {
                return results;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!(
                    "timed out waiting for {} results, got {}: {:?}",
                    count,
                    results.len(),
                    results
                );
            }
        }
    }
}

impl ResultWriter for CollectingWriter {
    fn write(&self, result: TaskResult) {
        self.results.lock().unwrap().push(result);
        self.notify.notify_waiters();
    }

    fn flush(&self) {}

    fn slots_available(&self) -> usize {
        self.slots.unwrap_or(usize::MAX)
    }

    fn persist_slots_available(&self) -> usize {
        self.slots.unwrap_or(usize::MAX)
    }
}
