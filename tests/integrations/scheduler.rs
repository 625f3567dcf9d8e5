//! End-to-end scheduling through a running application.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use helpers::{app::TestAppBuilder, registry_with, sink::CollectingWriter, FakePlugin};
use metricwatch::core::Request;
use metricwatch::plugin::Capabilities;
use metricwatch::scheduler::{ItemError, Scheduler};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_exporter_values_are_delivered() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    plugin.set_value("fake.b", Some("42"));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin.clone(), vec!["fake.a", "fake.b"])]))
        .start()
        .await?;

    let sink = CollectingWriter::new();
    app.scheduler
        .update_tasks(
            1,
            sink.clone(),
            0,
            Vec::new(),
            vec![Request::new(1, "fake.a", "1s"), Request::new(2, "fake.b[x]", "1s")],
        )
        .await?;

    assert_eq!(
        sink.wait_for_item(1, WAIT).await.value,
        Ok(Some("fake.a".to_string()))
    );
    assert_eq!(sink.wait_for_item(2, WAIT).await.value, Ok(Some("42".to_string())));

    app.shutdown(WAIT).await
}

#[tokio::test]
async fn test_unknown_key_is_reported_to_the_sink() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin, vec!["fake.a"])]))
        .start()
        .await?;

    let sink = CollectingWriter::new();
    app.scheduler
        .update_tasks(1, sink.clone(), 0, Vec::new(), vec![Request::new(7, "nope.key", "1s")])
        .await?;

    let results = sink.wait_for(1, WAIT).await;
    assert_eq!(results[0].itemid, 7);
    assert_eq!(
        results[0].value,
        Err(ItemError::UnknownMetric("nope.key".to_string()))
    );

    app.shutdown(WAIT).await
}

#[tokio::test]
async fn test_capacity_limits_concurrent_exports() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Slow").with_capacity(1));
    plugin.set_delay(Duration::from_millis(100));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin.clone(), vec!["slow.a"])]))
        .start()
        .await?;

    let sink = CollectingWriter::new();
    let requests = (1..=4)
        .map(|i| Request::new(i, format!("slow.a[{i}]"), "1s"))
        .collect();
    app.scheduler
        .update_tasks(1, sink.clone(), 0, Vec::new(), requests)
        .await?;

    for itemid in 1..=4 {
        sink.wait_for_item(itemid, WAIT).await;
    }
    assert_eq!(plugin.max_running(), 1);

    app.shutdown(WAIT).await
}

#[tokio::test]
async fn test_panicking_plugin_does_not_stop_the_scheduler() -> Result<()> {
    let panicky = Arc::new(FakePlugin::exporter("Panicky"));
    panicky.panic_on_export();
    let healthy = Arc::new(FakePlugin::exporter("Healthy"));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![
            (panicky, vec!["panicky.key"]),
            (healthy, vec!["healthy.key"]),
        ]))
        .start()
        .await?;

    let sink = CollectingWriter::new();
    app.scheduler
        .update_tasks(
            1,
            sink.clone(),
            0,
            Vec::new(),
            vec![
                Request::new(1, "panicky.key", "1s"),
                Request::new(2, "healthy.key", "1s"),
            ],
        )
        .await?;

    assert_eq!(
        sink.wait_for_item(1, WAIT).await.value,
        Err(ItemError::PluginPanic("Panicky".to_string()))
    );
    assert_eq!(
        sink.wait_for_item(2, WAIT).await.value,
        Ok(Some("healthy.key".to_string()))
    );

    // the loop keeps serving direct checks
    let value = app
        .scheduler
        .perform_task("healthy.key", Duration::from_secs(3))
        .await?;
    assert_eq!(value, "healthy.key");

    app.shutdown(WAIT).await
}

#[tokio::test]
async fn test_runner_is_started_and_stopped() -> Result<()> {
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
    sink.wait_for_item(1, WAIT).await;
    assert_eq!(plugin.starts(), 1);

    // dropping every item releases the plugin
    app.scheduler
        .update_tasks(1, sink.clone(), 0, Vec::new(), Vec::new())
        .await?;
    tokio::time::timeout(WAIT, async {
        while plugin.stops() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    assert_eq!(plugin.stops(), 1);

    app.shutdown(WAIT).await
}

#[tokio::test]
async fn test_full_sink_skips_regular_exports() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    let app = TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin.clone(), vec!["fake.a"])]))
        .start()
        .await?;

    let sink = CollectingWriter::full();
    app.scheduler
        .update_tasks(1, sink.clone(), 0, Vec::new(), vec![Request::new(1, "fake.a", "1s")])
        .await?;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(sink.results().is_empty());

    app.shutdown(WAIT).await
}
