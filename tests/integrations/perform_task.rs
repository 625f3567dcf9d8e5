//! Single item checks through the scheduler handle.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use helpers::{app::TestAppBuilder, registry_with, FakePlugin};
use metricwatch::scheduler::{ItemError, PerformError, Scheduler};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(3);

async fn start_with(plugin: Arc<FakePlugin>, keys: Vec<&str>) -> Result<helpers::app::TestApp> {
    TestAppBuilder::new()
        .with_registry(registry_with(vec![(plugin, keys)]))
        .with_config_modifier(|c| c.aliases = vec!["ping:fake.a".to_string()])
        .start()
        .await
}

#[tokio::test]
async fn test_healthy_value() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    plugin.set_value("fake.a", Some("ok"));
    let app = start_with(plugin, vec!["fake.a"]).await?;

    assert_eq!(app.scheduler.perform_task("fake.a", TIMEOUT).await?, "ok");
    // aliases resolve before the key is looked up
    assert_eq!(app.scheduler.perform_task("ping", TIMEOUT).await?, "ok");

    app.shutdown(TIMEOUT).await
}

#[tokio::test]
async fn test_hung_plugin_times_out() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    plugin.hang();
    let app = start_with(plugin, vec!["fake.a"]).await?;

    let result = app
        .scheduler
        .perform_task("fake.a", Duration::from_millis(500))
        .await;
    assert_eq!(result, Err(PerformError::Timeout));

    app.shutdown(Duration::from_secs(10)).await
}

#[tokio::test]
async fn test_zero_timeout_on_hung_plugin() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    plugin.hang();
    let app = start_with(plugin, vec!["fake.a"]).await?;

    let result = app.scheduler.perform_task("fake.a", Duration::ZERO).await;
    assert_eq!(result, Err(PerformError::Timeout));

    app.shutdown(Duration::from_secs(10)).await
}

#[tokio::test]
async fn test_unknown_metric() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    let app = start_with(plugin, vec!["fake.a"]).await?;

    let result = app.scheduler.perform_task("missing.key", TIMEOUT).await;
    assert_eq!(
        result,
        Err(PerformError::Item(ItemError::UnknownMetric(
            "missing.key".to_string()
        )))
    );

    app.shutdown(TIMEOUT).await
}

#[tokio::test]
async fn test_empty_value_is_an_error() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    plugin.set_value("fake.a", None);
    let app = start_with(plugin, vec!["fake.a"]).await?;

    let result = app.scheduler.perform_task("fake.a", TIMEOUT).await;
    assert_eq!(result, Err(PerformError::NoValues));

    app.shutdown(TIMEOUT).await
}

#[tokio::test]
async fn test_plugin_error_is_returned() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    plugin.set_error("fake.a", "boom");
    let app = start_with(plugin, vec!["fake.a"]).await?;

    let result = app.scheduler.perform_task("fake.a", TIMEOUT).await;
    assert_eq!(
        result,
        Err(PerformError::Item(ItemError::Collection("boom".to_string())))
    );

    app.shutdown(TIMEOUT).await
}

#[tokio::test]
async fn test_invalid_key_is_rejected() -> Result<()> {
    let plugin = Arc::new(FakePlugin::exporter("Fake"));
    let app = start_with(plugin, vec!["fake.a"]).await?;

    let result = app.scheduler.perform_task("fake.a[unterminated", TIMEOUT).await;
    assert!(matches!(
        result,
        Err(PerformError::Item(ItemError::InvalidKey(_)))
    ));

    app.shutdown(TIMEOUT).await
}
