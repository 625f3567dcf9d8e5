//! MetricWatch - Plugin based metric collection agent
//!
//! Runs the plugin scheduler until interrupted, or evaluates keys once in
//! test (`-t KEY`) and print (`-p`) modes.

use anyhow::Result;
use clap::Parser;
use metricwatch::{
    app::App,
    cli::{format_check, Cli},
    config::Config,
    plugins::builtin_registry,
    scheduler::Scheduler,
};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().init();
            error!("Failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    // RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if cli.is_one_shot() {
        return run_checks(&cli, config).await;
    }

    info!("MetricWatch starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Mailbox Capacity: {}", config.scheduler.mailbox_capacity);
    info!("Shutdown Timeout: {}s", config.scheduler.shutdown_timeout_seconds);
    info!(
        "Status Server: {}",
        if config.status.enabled {
            config.status.listen_address.to_string()
        } else {
            "Disabled".to_string()
        }
    );
    info!("Aliases: {}", config.aliases.len());
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;
    info!("MetricWatch initialized successfully.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Shutting down gracefully...");
    if shutdown_tx.send(true).is_err() {
        error!("No task is listening for the shutdown signal.");
    }

    app.run().await?;
    info!("All tasks shut down. Exiting.");
    Ok(())
}

/// Evaluates the requested keys through the scheduler and prints the results.
async fn run_checks(cli: &Cli, config: Config) -> Result<()> {
    let keys: Vec<String> = match &cli.test {
        Some(key) => vec![key.clone()],
        None => builtin_registry(&config)?
            .metrics()
            .map(|m| m.key.clone())
            .collect(),
    };
    let timeout = Duration::from_secs(cli.timeout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;
    let scheduler = app.scheduler();

    for key in keys {
        let result = scheduler.perform_task(&key, timeout).await;
        println!("{}", format_check(&key, &result));
    }

    let _ = shutdown_tx.send(true);
    app.run().await
}
