//! The batch consumer that fans each event out to every recipient token.

use super::client::NotificationTransport;
use super::NotifyError;
use crate::core::{BatchedSink, ConfigError, LogEvent, MessageFormatter};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Formats events and delivers them to every configured token in order.
///
/// Delivery is sequential: event by event, token by token. The first failure
/// aborts the rest of the batch and is returned to the caller.
pub struct DispatchSink<T: NotificationTransport> {
    transport: ArcSwapOption<T>,
    formatter: Box<dyn MessageFormatter>,
    tokens: Vec<String>,
}

impl<T: NotificationTransport> DispatchSink<T> {
    /// Creates a new `DispatchSink`.
    ///
    /// Fails if `tokens` is empty or any token is blank.
    pub fn new(
        transport: T,
        formatter: Box<dyn MessageFormatter>,
        tokens: Vec<String>,
    ) -> Result<Self, ConfigError> {
        if tokens.is_empty() {
            return Err(ConfigError::NoRecipients);
        }
        if let Some(index) = tokens.iter().position(|t| t.trim().is_empty()) {
            return Err(ConfigError::BlankToken { index });
        }
        Ok(Self {
            transport: ArcSwapOption::from_pointee(transport),
            formatter,
            tokens,
        })
    }
}

#[async_trait]
impl<T: NotificationTransport + 'static> BatchedSink for DispatchSink<T> {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn emit_batch(&self, events: &[LogEvent]) -> Result<(), NotifyError> {
        let transport: Arc<T> = self.transport.load_full().ok_or(NotifyError::Disposed)?;

        for event in events {
            let message = self.formatter.format(event);
            for token in &self.tokens {
                transport.notify(token, &message).await?;
            }
        }
        debug!("Batch delivered to all recipients.");
        Ok(())
    }

    async fn on_empty_batch(&self) {}

    async fn dispose(&self) {
        if let Some(transport) = self.transport.swap(None) {
            transport.close().await;
        }
    }
}
