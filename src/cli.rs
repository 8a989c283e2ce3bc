//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the `line-notify.toml` file and environment variables.

use crate::core::Level;
use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Sends log messages to LINE Notify.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Recipient token. Repeat for several recipients; replaces configured tokens.
    #[arg(short, long = "token", value_name = "TOKEN")]
    pub tokens: Vec<String>,

    /// Level assigned to every message sent.
    #[arg(short, long, value_name = "LEVEL", default_value = "Information")]
    pub level: Level,

    /// Suppress repeated messages for this many minutes.
    #[arg(long, value_name = "MINUTES")]
    pub block_minutes: Option<u64>,

    /// Logging level for the sink's own diagnostics.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Messages to send. Read from stdin, one per line, when none are given.
    #[arg(value_name = "MESSAGE")]
    pub messages: Vec<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();
        let mut sink = Dict::new();

        if !self.tokens.is_empty() {
            sink.insert("tokens".into(), Value::from(self.tokens.clone()));
        }

        if let Some(minutes) = self.block_minutes {
            sink.insert("block_duplicates_minutes".into(), Value::from(minutes));
        }

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if !sink.is_empty() {
            dict.insert("sink".into(), Value::from(sink));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
