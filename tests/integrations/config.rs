use metricwatch::cli::Cli;
use metricwatch::config::Config;
use serial_test::serial;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// A helper function to run a test with a temporary config file.
fn with_config_file<F>(toml_content: &str, test_fn: F)
where
    F: FnOnce(PathBuf),
{
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    let path = file.path().to_path_buf();
    test_fn(path);
}

#[test]
#[serial]
fn test_defaults_without_file() {
    let config = Config::load(&Cli::default()).unwrap();
    assert_eq!(config.log_level, "info");
    assert_eq!(config.scheduler.mailbox_capacity, 10);
    assert_eq!(config.scheduler.shutdown_timeout_seconds, 5);
    assert_eq!(config.scheduler.clock_skew_tolerance_seconds, 10);
    assert_eq!(config.scheduler.cleanup_interval_seconds, 3600);
    assert!(!config.status.enabled);
    assert!(config.plugins.is_empty());
}

#[test]
#[serial]
fn test_load_full_valid_config() {
    let toml_content = r#"
        log_level = "debug"
        hostname = "edge-01"
        aliases = ["ping:agent.ping"]

        [scheduler]
        mailbox_capacity = 32
        shutdown_timeout_seconds = 2
        clock_skew_tolerance_seconds = 30
        cleanup_interval_seconds = 600

        [status]
        enabled = true
        listen_address = "0.0.0.0:9000"

        [plugins.Cpu]
        capacity = 3
        mode = "fast"
    "#;

    with_config_file(toml_content, |path| {
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let config = Config::load(&cli).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.hostname.as_deref(), Some("edge-01"));
        assert_eq!(config.aliases, vec!["ping:agent.ping".to_string()]);
        assert_eq!(config.scheduler.mailbox_capacity, 32);
        assert_eq!(config.scheduler.shutdown_timeout_seconds, 2);
        assert_eq!(config.scheduler.clock_skew_tolerance_seconds, 30);
        assert_eq!(config.scheduler.cleanup_interval_seconds, 600);
        assert!(config.status.enabled);
        assert_eq!(config.status.listen_address.port(), 9000);

        let cpu = config.plugins.get("Cpu").unwrap();
        assert_eq!(cpu.capacity, Some(serde_json::json!(3)));
        assert_eq!(
            config.plugin_options("Cpu"),
            serde_json::json!({ "mode": "fast" })
        );
        assert_eq!(config.plugin_options("Agent"), serde_json::Value::Null);
    });
}

#[test]
#[serial]
fn test_partial_file_keeps_defaults() {
    let toml_content = r#"
        [scheduler]
        shutdown_timeout_seconds = 1
    "#;

    with_config_file(toml_content, |path| {
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.scheduler.shutdown_timeout_seconds, 1);
        assert_eq!(config.scheduler.mailbox_capacity, 10);
        assert_eq!(config.log_level, "info");
    });
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let toml_content = r#"
        [scheduler]
        mailbox_capacity = 32
    "#;

    with_config_file(toml_content, |path| {
        std::env::set_var("METRICWATCH_SCHEDULER__MAILBOX_CAPACITY", "64");
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let config = Config::load(&cli);
        std::env::remove_var("METRICWATCH_SCHEDULER__MAILBOX_CAPACITY");

        assert_eq!(config.unwrap().scheduler.mailbox_capacity, 64);
    });
}

#[test]
#[serial]
fn test_cli_overrides_everything() {
    let toml_content = r#"
        log_level = "debug"

        [status]
        enabled = false
        listen_address = "127.0.0.1:9000"
    "#;

    with_config_file(toml_content, |path| {
        std::env::set_var("METRICWATCH_LOG_LEVEL", "warn");
        let cli = Cli {
            config: Some(path),
            log_level: Some("trace".to_string()),
            status_listen: Some("127.0.0.1:9100".to_string()),
            ..Default::default()
        };
        let config = Config::load(&cli);
        std::env::remove_var("METRICWATCH_LOG_LEVEL");

        let config = config.unwrap();
        assert_eq!(config.log_level, "trace");
        assert!(config.status.enabled);
        assert_eq!(config.status.listen_address.port(), 9100);
    });
}

#[test]
#[serial]
fn test_invalid_value_is_an_error() {
    let toml_content = r#"
        [scheduler]
        mailbox_capacity = "many"
    "#;

    with_config_file(toml_content, |path| {
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        assert!(Config::load(&cli).is_err());
    });
}

#[test]
#[serial]
fn test_malformed_plugin_capacity_still_loads() {
    let toml_content = r#"
        [plugins.Cpu]
        capacity = "lots"
        mode = "fast"
    "#;

    with_config_file(toml_content, |path| {
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let config = Config::load(&cli).unwrap();

        let cpu = config.plugins.get("Cpu").unwrap();
        assert_eq!(cpu.capacity, Some(serde_json::json!("lots")));
        assert_eq!(
            config.plugin_options("Cpu"),
            serde_json::json!({ "mode": "fast" })
        );
    });
}
