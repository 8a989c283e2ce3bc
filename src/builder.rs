//! Assembles the delivery pipeline from its configuration.
//!
//! The resulting chain is, from the caller inward:
//! minimum level → duplicate filter (optional) → periodic batching →
//! dispatch to every token.

use crate::config::SinkConfig;
use crate::core::{ConfigError, EventSink, Level, LogEvent, RestrictedSink, SinkError};
use crate::deduplication::{fingerprint_cache, DuplicateFilter, FingerprintCache};
use crate::formatting::{TemplateFormatter, DEFAULT_OUTPUT_TEMPLATE};
use crate::notification::client::{LineNotifyClient, DEFAULT_API_URL, DEFAULT_TIMEOUT};
use crate::notification::{BatchingOptions, DispatchSink, PeriodicBatchingSink};
use chrono::FixedOffset;
use std::time::Duration;
use tracing::info;

/// A shareable handle to the assembled pipeline.
pub type NotifySink = std::sync::Arc<dyn EventSink>;

/// Emits `event`, sleeping `retry_after` and trying again while the queue is
/// full. For producers that own the sink and must not lose their own input.
pub async fn emit_waiting(sink: &dyn EventSink, event: LogEvent, retry_after: Duration) -> Result<(), SinkError> {
    loop {
        match sink.emit(event.clone()) {
            Err(SinkError::QueueFull { .. }) => tokio::time::sleep(retry_after).await,
            other => return other,
        }
    }
}

pub struct LineNotifyBuilder {
    output_template: String,
    tokens: Vec<String>,
    api_url: String,
    client: Option<reqwest::Client>,
    timeout: Duration,
    timestamp_format: Option<String>,
    offset: Option<FixedOffset>,
    minimum_level: Level,
    block_duplicates: Option<Duration>,
    cache: Option<FingerprintCache>,
    cache_capacity: u64,
    batching: BatchingOptions,
}

impl LineNotifyBuilder {
    pub fn new<I, T>(output_template: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            output_template: output_template.into(),
            tokens: tokens.into_iter().map(Into::into).collect(),
            api_url: DEFAULT_API_URL.to_string(),
            client: None,
            timeout: DEFAULT_TIMEOUT,
            timestamp_format: None,
            offset: None,
            minimum_level: Level::Verbose,
            block_duplicates: None,
            cache: None,
            cache_capacity: crate::deduplication::DEFAULT_CACHE_CAPACITY,
            batching: BatchingOptions::default(),
        }
    }

    /// Shorthand for a single recipient.
    pub fn single(output_template: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(output_template, [token.into()])
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self, ConfigError> {
        let mut builder = Self::new(config.output_template.clone(), config.tokens.clone())
            .api_url(config.api_url.clone())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .minimum_level(config.minimum_level)
            .batching(BatchingOptions {
                batch_size_limit: config.batching.batch_size_limit,
                period: Duration::from_millis(config.batching.period_ms),
                queue_limit: config.batching.queue_limit,
            });
        builder.cache_capacity = config.dedup_cache_size;
        if let Some(format) = &config.timestamp_format {
            builder = builder.timestamp_format(format.clone());
        }
        if let Some(minutes) = config.block_duplicates_minutes {
            let seconds = minutes
                .checked_mul(60)
                .ok_or(ConfigError::InvalidBlockSpan { minutes })?;
            builder = builder.block_duplicates(Duration::from_secs(seconds));
        }
        Ok(builder)
    }

    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Uses a pre-built HTTP client. Its own timeout settings apply.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = Some(format.into());
        self
    }

    pub fn utc_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Events below `level` are never emitted.
    pub fn minimum_level(mut self, level: Level) -> Self {
        self.minimum_level = level;
        self
    }

    /// Suppresses repeats of the same (level, template) pair for `span`.
    pub fn block_duplicates(mut self, span: Duration) -> Self {
        self.block_duplicates = Some(span);
        self
    }

    /// Supplies the cache used by the duplicate filter.
    pub fn fingerprint_cache(mut self, cache: FingerprintCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn batching(mut self, options: BatchingOptions) -> Self {
        self.batching = options;
        self
    }

    /// Builds the pipeline. Must be called from within a tokio runtime,
    /// since the batching worker is spawned here.
    pub fn build(self) -> Result<NotifySink, ConfigError> {
        let transport = match self.client {
            Some(client) => LineNotifyClient::with_client(client, &self.api_url)?,
            None => LineNotifyClient::new(&self.api_url, self.timeout)?,
        };

        let mut formatter = TemplateFormatter::new(self.output_template);
        if let Some(format) = self.timestamp_format {
            formatter = formatter.with_timestamp_format(format);
        }
        if let Some(offset) = self.offset {
            formatter = formatter.with_offset(offset);
        }

        let recipients = self.tokens.len();
        let dispatch = DispatchSink::new(transport, Box::new(formatter), self.tokens)?;
        let batching = PeriodicBatchingSink::new(dispatch, self.batching)?;

        let sink: NotifySink = match self.block_duplicates {
            Some(span) => {
                let cache = self
                    .cache
                    .unwrap_or_else(|| fingerprint_cache(self.cache_capacity));
                info!(recipients, block_seconds = span.as_secs(), "LINE Notify sink ready with duplicate blocking");
                std::sync::Arc::new(RestrictedSink::new(
                    DuplicateFilter::with_cache(batching, span, cache),
                    self.minimum_level,
                ))
            }
            None => {
                info!(recipients, "LINE Notify sink ready");
                std::sync::Arc::new(RestrictedSink::new(batching, self.minimum_level))
            }
        };
        Ok(sink)
    }
}

impl Default for LineNotifyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_TEMPLATE, Vec::<String>::new())
    }
}
