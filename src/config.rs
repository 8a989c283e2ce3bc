//! Configuration management for the LINE Notify sink
//!
//! This module defines the main `Config` struct and its sub-structs. It
//! uses the `figment` crate to layer built-in defaults, a
//! `line-notify.toml` file, `LINE_NOTIFY_` environment variables and
//! command-line arguments, in that order of precedence.

use crate::cli::Cli;
use crate::core::Level;
use crate::formatting::DEFAULT_OUTPUT_TEMPLATE;
use crate::deduplication::DEFAULT_CACHE_CAPACITY;
use crate::notification::DEFAULT_API_URL;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_FILE: &str = "line-notify.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the sink's own diagnostics.
    pub log_level: String,
    /// Configuration for notification delivery.
    pub sink: SinkConfig,
}

/// Configuration for the delivery pipeline.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SinkConfig {
    /// The notification endpoint.
    pub api_url: String,
    /// The template each event is rendered through.
    pub output_template: String,
    /// Recipient tokens, notified in this order.
    pub tokens: Vec<String>,
    /// Events below this level are never sent.
    pub minimum_level: Level,
    /// Request timeout for each notification, in seconds.
    pub timeout_seconds: u64,
    /// strftime pattern for `{Timestamp}` tokens without their own format.
    pub timestamp_format: Option<String>,
    /// Cooldown for repeated (level, template) pairs, in minutes. Unset disables blocking.
    pub block_duplicates_minutes: Option<u64>,
    /// Maximum number of fingerprints kept while blocking duplicates.
    pub dedup_cache_size: u64,
    /// Batching and queueing behaviour.
    pub batching: BatchingConfig,
}

/// Configuration for the periodic batching worker.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BatchingConfig {
    /// Flush as soon as this many events are queued.
    pub batch_size_limit: usize,
    /// Flush at least this often, in milliseconds.
    pub period_ms: u64,
    /// Maximum number of queued events before new ones are rejected.
    pub queue_limit: usize,
}

impl Config {
    /// Loads the configuration by layering every source.
    ///
    /// An explicit `--config` file must exist; the default file is optional.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = match &cli.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("configuration file not found: {}", path.display());
                }
                path.clone()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // e.g. LINE_NOTIFY_SINK__TOKENS='["abc"]' or LINE_NOTIFY_LOG_LEVEL=debug
            .merge(Env::prefixed("LINE_NOTIFY_").split("__"))
            .merge(cli.clone())
            .extract()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            sink: SinkConfig {
                api_url: DEFAULT_API_URL.to_string(),
                output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
                tokens: vec![],
                minimum_level: Level::Verbose,
                timeout_seconds: 10,
                timestamp_format: None,
                block_duplicates_minutes: None,
                dedup_cache_size: DEFAULT_CACHE_CAPACITY,
                batching: BatchingConfig {
                    batch_size_limit: 1,
                    period_ms: 1000,
                    queue_limit: 1000,
                },
            },
        }
    }
}
