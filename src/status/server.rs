//! # Status Server
//!
//! An `axum` server with two endpoints:
//!
//! - `/status` returns the scheduler's plugin report as plain text.
//! - `/metrics` renders all registered metrics in the Prometheus format.
//!
//! The server stops when the application shutdown signal fires.

use super::StatusEndpoint;
use crate::scheduler::{Scheduler, SchedulerHandle};
use axum::{extract::State, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

#[derive(Clone)]
struct StatusState {
    scheduler: SchedulerHandle,
    prom_handle: PrometheusHandle,
}

pub struct StatusServer {
    listener: TcpListener,
    state: StatusState,
    shutdown_rx: watch::Receiver<bool>,
}

impl StatusServer {
    pub fn new(
        endpoint: StatusEndpoint,
        scheduler: SchedulerHandle,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener: endpoint.listener,
            state: StatusState {
                scheduler,
                prom_handle: endpoint.prom_handle,
            },
            shutdown_rx,
        }
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(mut self) -> impl Future<Output = ()> {
        let app = Router::new()
            .route("/status", get(status))
            .route("/metrics", get(render_metrics))
            .with_state(self.state);

        async move {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    trace!("Status server received shutdown signal.");
                }
                result = axum::serve(self.listener, app.into_make_service()) => {
                    if let Err(e) = result {
                        error!(error = %e, "Status server error.");
                    }
                }
            }
            trace!("Status server task finished.");
        }
    }
}

async fn status(State(state): State<StatusState>) -> String {
    state.scheduler.query("metrics").await
}

async fn render_metrics(State(state): State<StatusState>) -> String {
    state.prom_handle.render()
}
