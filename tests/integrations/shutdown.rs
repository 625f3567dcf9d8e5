//! Draining and termination of the scheduler.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use helpers::{app::TestAppBuilder, registry_with, sink::CollectingWriter, FakePlugin};
use metricwatch::core::Request;
use metricwatch::plugin::Capabilities;
use metricwatch::scheduler::{ItemError, PerformError, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

#[tokio::test]
async fn test_idle_scheduler_exits_immediately() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin, vec!["fake.a"])]))
        .start()
        .await?;
    let scheduler = app.scheduler.clone();

    app.shutdown(Duration::from_secs(1)).await?;
    assert!(scheduler.is_closed());
    assert_eq!(
        scheduler.perform_task("fake.a", Duration::from_secs(1)).await,
        Err(PerformError::Closed)
    );
    Ok(())
}

#[tokio::test]
async fn test_hung_task_is_abandoned_after_the_countdown() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    plugin.hang();
    let mut app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin.clone(), vec!["fake.a"])]))
        .with_config_modifier(|c| c.scheduler.shutdown_timeout_seconds = 2)
        .start()
        .await?;

    let _ = app
        .scheduler
        .perform_task("fake.a", Duration::from_millis(300))
        .await;
    assert_eq!(plugin.running(), 1);

    let started = Instant::now();
    app.shutdown_tx.send(true)?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // new direct checks are refused while draining
    let result = app
        .scheduler
        .perform_task("fake.a", Duration::from_secs(1))
        .await;
    assert_eq!(result, Err(PerformError::Item(ItemError::ShuttingDown)));

    let handle = app.app_handle.take().expect("app is running");
    timeout(Duration::from_secs(6), handle).await???;
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(app.scheduler.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_default_countdown_bounds_the_drain() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    plugin.hang();
    let mut app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin.clone(), vec!["fake.a"])]))
        .with_config_modifier(|c| c.scheduler.shutdown_timeout_seconds = 5)
        .start()
        .await?;

    let _ = app
        .scheduler
        .perform_task("fake.a", Duration::from_millis(300))
        .await;
    assert_eq!(plugin.running(), 1);

    let started = Instant::now();
    app.shutdown_tx.send(true)?;

    // the control loop closes its mailbox when it exits
    while !app.scheduler.is_closed() {
        assert!(
            started.elapsed() < Duration::from_secs(7),
            "scheduler still draining after {:?}",
            started.elapsed()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(4), "exited after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(6_500), "exited after {:?}", elapsed);
    // the hung task was abandoned, not awaited
    assert_eq!(plugin.running(), 1);

    let handle = app.app_handle.take().expect("app is running");
    timeout(Duration::from_secs(10), handle).await???;
    Ok(())
}

#[tokio::test]
async fn test_runners_are_stopped_on_shutdown() -> Result<()> {
    let plugin = Arc::new(FakePlugin::new(
        "Runner",
        Capabilities::RUNNER | Capabilities::EXPORTER,
    ));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin.clone(), vec!["runner.key"])]))
        .start()
        .await?;

    let sink = CollectingWriter::new();
    app.scheduler
        .update_tasks(1, sink.clone(), 0, Vec::new(), vec![Request::new(1, "runner.key", "1s")])
        .await?;
    sink.wait_for_item(1, Duration::from_secs(5)).await;

    app.shutdown(Duration::from_secs(5)).await?;
    assert_eq!(plugin.starts(), 1);
    assert_eq!(plugin.stops(), 1);
    Ok(())
}
