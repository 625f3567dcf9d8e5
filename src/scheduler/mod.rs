//! The task scheduler.
//!
//! A single control loop ([`Manager`]) owns every plugin agent, task and
//! client. The outside world talks to it only through a bounded mailbox,
//! wrapped by [`SchedulerHandle`]. Dispatched tasks run in their own tokio
//! tasks and report back through the same mailbox when they finish.

pub mod agent;
pub mod client;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod task;
pub mod worker;

use crate::alias::AliasError;
use crate::core::{ChannelWriter, Request, Sink};
use crate::expression::Expression;
use crate::interval::IntervalError;
use crate::itemkey::KeyError;
use crate::plugin::PluginError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

pub use manager::Manager;
pub use worker::TaskOutcome;

/// Client id reserved for direct, single item requests.
pub const DIRECT_CLIENT_ID: u64 = 0;

/// Errors delivered to a requester as the result of a single item.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemError {
    #[error("Unknown metric {0}")]
    UnknownMetric(String),
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
    #[error(transparent)]
    InvalidInterval(#[from] IntervalError),
    #[error("{0}")]
    Collection(String),
    #[error("Cannot obtain item value during shutdown process.")]
    ShuttingDown,
    #[error("Plugin {0} failed unexpectedly while gathering data.")]
    PluginPanic(String),
}

impl From<PluginError> for ItemError {
    fn from(e: PluginError) -> Self {
        ItemError::Collection(e.to_string())
    }
}

/// Errors returned by [`Scheduler::perform_task`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PerformError {
    #[error("Timeout occurred while gathering data.")]
    Timeout,
    #[error("No values have been gathered yet.")]
    NoValues,
    #[error(transparent)]
    Item(#[from] ItemError),
    #[error("Scheduler is not running.")]
    Closed,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is not running.")]
    Closed,
    #[error("invalid plugin {0} configuration: {1}")]
    InvalidPluginConfig(String, PluginError),
    #[error(transparent)]
    Alias(#[from] AliasError),
}

impl From<SchedulerError> for PerformError {
    fn from(_: SchedulerError) -> Self {
        PerformError::Closed
    }
}

/// A batch of item requests from one requester.
#[derive(Clone)]
pub struct UpdateRequest {
    pub client_id: u64,
    pub sink: Sink,
    /// Interval in seconds for retrying items that failed, 0 to use the item delay.
    pub refresh_unsupported: i64,
    pub expressions: Vec<Expression>,
    pub requests: Vec<Request>,
}

/// A diagnostic query with its reply channel.
pub struct QueryRequest {
    pub command: String,
    pub reply: oneshot::Sender<String>,
}

/// Everything the control loop can receive.
pub enum Message {
    Update(UpdateRequest),
    Finish(TaskOutcome),
    Query(QueryRequest),
    Shutdown,
}

/// Operations offered to transport and CLI layers.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submits the full set of items a requester currently wants monitored.
    async fn update_tasks(
        &self,
        client_id: u64,
        sink: Sink,
        refresh_unsupported: i64,
        expressions: Vec<Expression>,
        requests: Vec<Request>,
    ) -> Result<(), SchedulerError>;

    /// Evaluates a single key and waits at most `timeout` for its value.
    async fn perform_task(&self, key: &str, timeout: Duration) -> Result<String, PerformError>;

    /// Returns diagnostic status text.
    async fn query(&self, command: &str) -> String;
}

/// Cloneable handle to a running [`Manager`].
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    tx: async_channel::Sender<Message>,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: async_channel::Sender<Message>) -> Self {
        Self { tx }
    }

    async fn send(&self, message: Message) -> Result<(), SchedulerError> {
        self.tx.send(message).await.map_err(|_| SchedulerError::Closed)
    }

    /// Reports a finished task back to the control loop. Only workers call this.
    pub async fn finish_task(&self, outcome: TaskOutcome) {
        if self.send(Message::Finish(outcome)).await.is_err() {
            debug!("Scheduler stopped before a task finish could be reported.");
        }
    }

    /// Asks the control loop to drain and stop.
    pub async fn stop(&self) {
        if self.send(Message::Shutdown).await.is_err() {
            debug!("Scheduler already stopped.");
        }
    }

    /// Returns `true` once the control loop has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl Scheduler for SchedulerHandle {
    async fn update_tasks(
        &self,
        client_id: u64,
        sink: Sink,
        refresh_unsupported: i64,
        expressions: Vec<Expression>,
        requests: Vec<Request>,
    ) -> Result<(), SchedulerError> {
        self.send(Message::Update(UpdateRequest {
            client_id,
            sink,
            refresh_unsupported,
            expressions,
            requests,
        }))
        .await
    }

    async fn perform_task(&self, key: &str, timeout: Duration) -> Result<String, PerformError> {
        let (writer, rx) = ChannelWriter::new();
        let request = Request {
            itemid: 0,
            key: key.to_string(),
            delay: String::new(),
            last_logsize: Some(0),
            mtime: Some(0),
        };
        self.update_tasks(DIRECT_CLIENT_ID, Arc::new(writer), 0, Vec::new(), vec![request])
            .await?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Ok(result)) => match result.value {
                Ok(Some(value)) => Ok(value),
                // single item requests do not support empty values
                Ok(None) => Err(PerformError::NoValues),
                Err(e) => Err(PerformError::Item(e)),
            },
            // the task was discarded without producing a result
            Ok(Err(_)) => Err(PerformError::Closed),
            Err(_) => Err(PerformError::Timeout),
        }
    }

    async fn query(&self, command: &str) -> String {
        let (reply, rx) = oneshot::channel();
        let request = QueryRequest {
            command: command.to_string(),
            reply,
        };
        if let Err(e) = self.send(Message::Query(request)).await {
            return format!("cannot process request: {}", e);
        }
        rx.await
            .unwrap_or_else(|e| format!("cannot process request: {}", e))
    }
}
