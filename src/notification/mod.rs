//! Delivery of log events to LINE Notify.
//!
//! The pipeline is split into three stages. `client` performs one HTTP
//! call per (token, message) pair, `sink` fans a batch out over every
//! recipient token, and `batching` decouples the caller's emit from the
//! network by queueing events for a single background worker.
pub mod batching;
pub mod client;
pub mod sink;

use thiserror::Error;

pub use batching::{BatchingOptions, PeriodicBatchingSink};
pub use client::{LineNotifyClient, NotificationTransport, DEFAULT_API_URL};
pub use sink::DispatchSink;

/// Errors raised while delivering a notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The endpoint rejected the token with 401. The token should not be retried.
    #[error("notification token is no longer valid: {token}")]
    InvalidToken { token: String },

    #[error("notification delivery failed: status {status}, body: {body}")]
    Delivery { status: u16, body: String },

    #[error("HTTP request to the notification endpoint failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification transport has been disposed")]
    Disposed,
}

/// Shortens a token for log output so full credentials never reach the logs.
pub(crate) fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{}***", visible)
}
