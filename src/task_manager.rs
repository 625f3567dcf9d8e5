//! Tracks the long-running tasks of the agent.
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A centralized manager for the agent's long-running tasks.
///
/// Plugin jobs are not tracked here: they are owned by the scheduler, which
/// bounds how long shutdown waits for them.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns a new task and adds its handle to the manager.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        match self.handles.lock() {
            Ok(mut handles) => handles.push((name, handle)),
            Err(poisoned) => poisoned.into_inner().push((name, handle)),
        }
    }

    /// Returns a clone of the shutdown receiver.
    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tracked tasks that have not completed yet.
    pub fn running(&self) -> usize {
        match self.handles.lock() {
            Ok(handles) => handles.iter().filter(|(_, h)| !h.is_finished()).count(),
            Err(poisoned) => poisoned.into_inner().iter().filter(|(_, h)| !h.is_finished()).count(),
        }
    }

    /// Waits for all tracked tasks, aborting whatever is still running once
    /// `grace` has elapsed.
    pub async fn shutdown(self, grace: Duration) {
        let handles = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect::<Vec<_>>(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect::<Vec<_>>(),
        };
        info!(tasks = handles.len(), "TaskManager shutting down. Waiting for tasks to complete...");

        let task_names: Vec<&'static str> = handles.iter().map(|(name, _)| *name).collect();
        let aborts: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();
        debug!(tasks = ?task_names, "Awaiting all tasks.");

        let joined = join_all(handles.into_iter().map(|(_, handle)| handle));
        let results = match tokio::time::timeout(grace, joined).await {
            Ok(results) => results,
            Err(_) => {
                warn!(?grace, "Tasks did not finish in time, aborting them.");
                for abort in aborts {
                    abort.abort();
                }
                return;
            }
        };

        let mut panics = Vec::new();
        for (task_name, result) in task_names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name, error = %e, "Task panicked during shutdown.");
                    panics.push(task_name);
                }
            }
        }

        if panics.is_empty() {
            info!("All tasks shut down gracefully.");
        } else {
            error!(tasks = ?panics, "{} tasks panicked during shutdown.", panics.len());
        }
    }
}
