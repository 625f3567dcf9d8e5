//! Core domain types and service traits for MetricWatch
//!
//! This module defines the data exchanged between requesters and the
//! scheduler, and the result sink contract every requester implements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::scheduler::ItemError;

/// A single item a requester wants monitored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Request {
    /// Requester-side identifier of the item.
    pub itemid: u64,
    /// Metric key with parameters, e.g. `system.cpu.util[,user]`.
    pub key: String,
    /// Update interval, e.g. `30s` or `5m`. Ignored for direct checks.
    #[serde(default)]
    pub delay: String,
    /// Last read position, used by log watching collectors.
    #[serde(default)]
    pub last_logsize: Option<u64>,
    /// Last seen modification time, used by log watching collectors.
    #[serde(default)]
    pub mtime: Option<i64>,
}

impl Request {
    /// Creates a request with the given item id, key and delay.
    pub fn new(itemid: u64, key: impl Into<String>, delay: impl Into<String>) -> Self {
        Self {
            itemid,
            key: key.into(),
            delay: delay.into(),
            ..Default::default()
        }
    }
}

/// One result delivered to a requester's sink.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub itemid: u64,
    /// `Ok(None)` means the collector legitimately produced no value.
    pub value: Result<Option<String>, ItemError>,
    pub last_logsize: Option<u64>,
    pub mtime: Option<i64>,
    pub ts: DateTime<Utc>,
}

impl TaskResult {
    /// Creates a successful result.
    pub fn value(itemid: u64, value: Option<String>, ts: DateTime<Utc>) -> Self {
        Self {
            itemid,
            value: Ok(value),
            last_logsize: None,
            mtime: None,
            ts,
        }
    }

    /// Creates an error result.
    pub fn error(itemid: u64, error: ItemError, ts: DateTime<Utc>) -> Self {
        Self {
            itemid,
            value: Err(error),
            last_logsize: None,
            mtime: None,
            ts,
        }
    }

    pub fn is_error(&self) -> bool {
        self.value.is_err()
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Receives results produced by the scheduler.
///
/// Implementations are invoked concurrently from many worker tasks and must
/// therefore be internally synchronized.
pub trait ResultWriter: Send + Sync {
    /// Delivers a single result.
    fn write(&self, result: TaskResult);

    /// Forces delivery of any buffered results.
    fn flush(&self);

    /// Remaining buffer capacity for ordinary results.
    fn slots_available(&self) -> usize;

    /// Remaining buffer capacity for persistent (log) results.
    fn persist_slots_available(&self) -> usize;
}

/// Shared handle to a result sink.
pub type Sink = Arc<dyn ResultWriter>;

/// A single-slot sink used by synchronous callers.
///
/// Only the first result is kept; any later writes are dropped.
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    tx: async_channel::Sender<TaskResult>,
}

impl ChannelWriter {
    /// Creates the writer together with the receiver for its single result.
    pub fn new() -> (Self, async_channel::Receiver<TaskResult>) {
        let (tx, rx) = async_channel::bounded(1);
        (Self { tx }, rx)
    }
}

impl ResultWriter for ChannelWriter {
    fn write(&self, result: TaskResult) {
        if let Err(e) = self.tx.try_send(result) {
            tracing::debug!(error = %e, "Dropping result for a one-shot caller.");
        }
    }

    fn flush(&self) {}

    fn slots_available(&self) -> usize {
        1
    }

    fn persist_slots_available(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_writer_keeps_first_result_only() {
        let (writer, rx) = ChannelWriter::new();
        let now = Utc::now();
        writer.write(TaskResult::value(1, Some("first".to_string()), now));
        writer.write(TaskResult::value(1, Some("second".to_string()), now));

        let result = rx.recv().await.unwrap();
        assert_eq!(result.value, Ok(Some("first".to_string())));
        assert!(rx.try_recv().is_err());
    }
}
