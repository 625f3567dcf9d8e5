//! Command-Line Interface (CLI) argument parsing.
//!
//! Arguments are parsed at startup and merged over the configuration file
//! and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

use crate::scheduler::PerformError;

/// A plugin based metric collection agent.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Logging level, overrides the configuration file.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Enable the status server on the given address.
    #[arg(long, value_name = "ADDR")]
    pub status_listen: Option<String>,

    /// Evaluate a single key, print its value and exit.
    #[arg(short = 't', long = "test", value_name = "KEY")]
    pub test: Option<String>,

    /// Evaluate every known key, print the values and exit.
    #[arg(short = 'p', long = "print", conflicts_with = "test")]
    pub print: bool,

    /// Seconds to wait for each value in test and print modes.
    #[arg(long, value_name = "SECONDS", default_value_t = 3)]
    pub timeout: u64,
}

impl Cli {
    /// The agent runs once and exits instead of serving requests.
    pub fn is_one_shot(&self) -> bool {
        self.test.is_some() || self.print
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(addr) = &self.status_listen {
            let mut status = Dict::new();
            status.insert("enabled".into(), Value::from(true));
            status.insert("listen_address".into(), Value::from(addr.clone()));
            dict.insert("status".into(), Value::from(status));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}

/// Formats the outcome of a single check the way test and print modes show it.
pub fn format_check(key: &str, result: &Result<String, PerformError>) -> String {
    match result {
        Ok(value) => format!("{key} [s|{value}]"),
        Err(e) => format!("{key} [m|ZBX_NOTSUPPORTED] [{e}]"),
    }
}
