//! Core domain types and sink traits
//!
//! This module defines the log event model and the trait contracts that
//! connect the pipeline stages: single-event sinks (`EventSink`), batch
//! consumers (`BatchedSink`) and message rendering (`MessageFormatter`).

use crate::notification::NotifyError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Severity of a log event, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Level {
    #[default]
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    /// The full name, as used in fingerprints and `{Level}` tokens.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Verbose => "Verbose",
            Level::Debug => "Debug",
            Level::Information => "Information",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        }
    }

    /// The three-letter abbreviation used by `{Level:u3}` and `{Level:w3}`.
    pub fn short_name(&self) -> &'static str {
        match self {
            Level::Verbose => "VRB",
            Level::Debug => "DBG",
            Level::Information => "INF",
            Level::Warning => "WRN",
            Level::Error => "ERR",
            Level::Fatal => "FTL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" | "trace" | "vrb" => Ok(Level::Verbose),
            "debug" | "dbg" => Ok(Level::Debug),
            "information" | "info" | "inf" => Ok(Level::Information),
            "warning" | "warn" | "wrn" => Ok(Level::Warning),
            "error" | "err" => Ok(Level::Error),
            "fatal" | "ftl" => Ok(Level::Fatal),
            _ => Err(ConfigError::InvalidLevel(s.to_string())),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, ConfigError> {
        value.parse()
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.as_str().to_string()
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Verbose,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Information,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// A structured log event. Immutable once handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// Severity of the event
    pub level: Level,
    /// The raw, unrendered message template, e.g. `"User {User} logged in"`
    pub message_template: String,
    /// Named values referenced by the template (and any extra context)
    pub properties: BTreeMap<String, String>,
    /// Rendered error or exception text attached to the event
    pub exception: Option<String>,
}

impl LogEvent {
    /// Creates an event stamped with the current time and no properties.
    pub fn new(level: Level, message_template: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message_template: message_template.into(),
            properties: BTreeMap::new(),
            exception: None,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Renders the message template, replacing `{Name}` tokens with the
    /// matching property. Tokens without a property are kept verbatim.
    pub fn render_message(&self) -> String {
        token_pattern()
            .replace_all(&self.message_template, |caps: &Captures| {
                self.properties
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Matches `{Name}` and `{Name:format}` tokens.
pub(crate) fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(?::([^{}]+))?\}").expect("token pattern is valid")
    })
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised when an event cannot be accepted by a sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("event queue is full ({limit} events), event rejected")]
    QueueFull { limit: usize },

    #[error("sink has been disposed")]
    Closed,
}

/// Construction-time configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one recipient token is required")]
    NoRecipients,

    #[error("recipient token at position {index} is blank")]
    BlankToken { index: usize },

    #[error("invalid notification endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid batching options: {0}")]
    InvalidBatching(String),

    #[error("duplicate block span of {minutes} minutes is out of range")]
    InvalidBlockSpan { minutes: u64 },

    #[error("unknown log level '{0}'")]
    InvalidLevel(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

// =============================================================================
// Sink Traits
// =============================================================================

/// Accepts single log events.
///
/// `emit` must never block on I/O; it is called from arbitrary caller
/// threads. Resources are released through `dispose`, which is a no-op for
/// sinks that hold nothing releasable.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Accepts one event for delivery.
    ///
    /// # Returns
    /// * `Ok(())` if the event was accepted (or deliberately discarded)
    /// * `Err` if the sink refused it (queue full, already disposed)
    fn emit(&self, event: LogEvent) -> Result<(), SinkError>;

    /// Releases owned resources. Calling it more than once is harmless.
    async fn dispose(&self) {}
}

#[async_trait]
impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: LogEvent) -> Result<(), SinkError> {
        (**self).emit(event)
    }

    async fn dispose(&self) {
        (**self).dispose().await
    }
}

#[async_trait]
impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn emit(&self, event: LogEvent) -> Result<(), SinkError> {
        (**self).emit(event)
    }

    async fn dispose(&self) {
        (**self).dispose().await
    }
}

/// Consumes batches of events assembled by a scheduler.
#[async_trait]
pub trait BatchedSink: Send + Sync {
    /// Delivers every event of the batch, in order.
    ///
    /// The first failure aborts the remainder of the batch and is returned.
    async fn emit_batch(&self, events: &[LogEvent]) -> Result<(), NotifyError>;

    /// Called on a flush tick when nothing was queued.
    async fn on_empty_batch(&self) {}

    /// Releases owned resources. Calling it more than once is harmless.
    async fn dispose(&self) {}
}

/// Renders an event into display text.
pub trait MessageFormatter: Send + Sync {
    fn format(&self, event: &LogEvent) -> String;
}

/// Drops events below a minimum level before they reach the wrapped sink.
pub struct RestrictedSink<S> {
    inner: S,
    minimum: Level,
}

impl<S: EventSink> RestrictedSink<S> {
    pub fn new(inner: S, minimum: Level) -> Self {
        Self { inner, minimum }
    }
}

#[async_trait]
impl<S: EventSink> EventSink for RestrictedSink<S> {
    fn emit(&self, event: LogEvent) -> Result<(), SinkError> {
        if event.level < self.minimum {
            return Ok(());
        }
        self.inner.emit(event)
    }

    async fn dispose(&self) {
        self.inner.dispose().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<LogEvent>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: LogEvent) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[test]
    fn test_render_message_substitutes_properties() {
        let event = LogEvent::new(Level::Information, "User {User} logged in from {Ip}")
            .with_property("User", "alice")
            .with_property("Ip", "10.0.0.1");
        assert_eq!(event.render_message(), "User alice logged in from 10.0.0.1");
    }

    #[test]
    fn test_render_message_keeps_unknown_tokens() {
        let event = LogEvent::new(Level::Warning, "Disk {Mount} at {Percent:0.0}%")
            .with_property("Mount", "/var");
        assert_eq!(event.render_message(), "Disk /var at {Percent:0.0}%");
    }

    #[test]
    fn test_level_ordering_and_parsing() {
        assert!(Level::Verbose < Level::Debug);
        assert!(Level::Error < Level::Fatal);
        assert_eq!("info".parse::<Level>().unwrap(), Level::Information);
        assert_eq!("WARN".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("Fatal".parse::<Level>().unwrap(), Level::Fatal);
        assert_eq!(
            "loud".parse::<Level>(),
            Err(ConfigError::InvalidLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_level_deserializes_from_string() {
        assert_eq!(Level::try_from("error".to_string()), Ok(Level::Error));
        assert!(Level::try_from("nope".to_string()).is_err());
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(Level::from(tracing::Level::TRACE), Level::Verbose);
        assert_eq!(Level::from(tracing::Level::ERROR), Level::Error);
    }

    #[test]
    fn test_restricted_sink_drops_events_below_minimum() {
        let recorder = Arc::new(RecordingSink::default());
        let sink = RestrictedSink::new(recorder.clone(), Level::Warning);

        sink.emit(LogEvent::new(Level::Information, "ignored")).unwrap();
        sink.emit(LogEvent::new(Level::Warning, "kept")).unwrap();
        sink.emit(LogEvent::new(Level::Fatal, "kept too")).unwrap();

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message_template, "kept");
    }
}
