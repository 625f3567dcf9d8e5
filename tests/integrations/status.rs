//! The diagnostic HTTP endpoint.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use helpers::{app::TestAppBuilder, registry_with, FakePlugin};
use metricwatch::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_status_and_metrics_endpoints() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake").with_capacity(4));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin, vec!["fake.a"])]))
        .with_status_server()
        .start()
        .await?;
    let addr = app.status_addr();

    app.scheduler
        .perform_task("fake.a", Duration::from_secs(3))
        .await?;
    // give the worker time to report completion
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = reqwest::get(format!("http://{addr}/status"))
        .await?
        .text()
        .await?;
    assert!(status.contains("[Fake]"), "unexpected status: {status}");
    assert!(status.contains("capacity: 0/4"), "unexpected status: {status}");
    assert!(status.contains("active tasks: 0"), "unexpected status: {status}");

    // let at least one tick publish the gauges
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let response = reqwest::get(format!("http://{addr}/metrics")).await?;
    assert!(response.status().is_success());
    let body = response.text().await?;
    assert!(body.contains("scheduler_active_tasks"), "unexpected metrics: {body}");
    assert!(body.contains("scheduler_tasks_dispatched_total"), "unexpected metrics: {body}");

    app.shutdown(Duration::from_secs(5)).await
}

#[tokio::test]
async fn test_query_rejects_unknown_commands() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin, vec!["fake.a"])]))
        .start()
        .await?;

    let reply = app.scheduler.query("bogus").await;
    assert_eq!(reply, "cannot process request: unknown request \"bogus\"");

    app.shutdown(Duration::from_secs(5)).await
}
