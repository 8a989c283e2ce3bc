//! A client for sending notifications to LINE Notify.

use super::{mask_token, NotifyError};
use crate::core::ConfigError;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_API_URL: &str = "https://notify-api.line.me/api/notify";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A trait for transports that deliver one message to one recipient.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Sends `message` to the recipient identified by `token`.
    ///
    /// # Returns
    /// * `Ok(())` when the endpoint answered 200
    /// * `Err(NotifyError::InvalidToken)` when it answered 401
    /// * `Err(NotifyError::Delivery)` for any other status
    async fn notify(&self, token: &str, message: &str) -> Result<(), NotifyError>;

    /// Releases the underlying connection resources.
    async fn close(&self) {}
}

/// Posts form-encoded messages with bearer authentication.
pub struct LineNotifyClient {
    client: reqwest::Client,
    api_url: Url,
}

impl LineNotifyClient {
    /// Creates a client with its own connection pool and a request timeout.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Self::with_client(client, api_url)
    }

    /// Wraps a caller-supplied `reqwest::Client`, which is used as-is.
    pub fn with_client(client: reqwest::Client, api_url: &str) -> Result<Self, ConfigError> {
        let api_url = Url::parse(api_url).map_err(|e| ConfigError::InvalidEndpoint {
            url: api_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { client, api_url })
    }
}

#[async_trait]
impl NotificationTransport for LineNotifyClient {
    #[instrument(skip_all, fields(token = %mask_token(token), len = message.len()))]
    async fn notify(&self, token: &str, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.api_url.clone())
            .bearer_auth(token)
            .form(&[("message", message)])
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request to LINE Notify failed");
                metrics::counter!("notify_delivery_failures_total").increment(1);
                NotifyError::Http(e)
            })?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                debug!("Notification delivered.");
                metrics::counter!("notify_messages_sent_total").increment(1);
                Ok(())
            }
            StatusCode::UNAUTHORIZED => {
                warn!("LINE Notify rejected the token as invalid");
                metrics::counter!("notify_delivery_failures_total").increment(1);
                Err(NotifyError::InvalidToken {
                    token: token.to_string(),
                })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Failed to send LINE notification");
                metrics::counter!("notify_delivery_failures_total").increment(1);
                Err(NotifyError::Delivery {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn close(&self) {
        // Pooled connections are released when the last handle is dropped.
        debug!(api_url = %self.api_url, "LINE Notify client closed.");
    }
}
