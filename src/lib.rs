/// LINE Notify sink - batched delivery of structured log events
///
/// This library turns log events into formatted messages and pushes them to
/// every configured LINE Notify token, optionally suppressing repeats of the
/// same message template within a cooldown window.
pub mod notification;

pub mod builder;
pub mod cli;
pub mod config;
pub mod core;
pub mod deduplication;
pub mod formatting;
pub mod layer;

// Re-export core types for convenience
pub use crate::core::*;
pub use builder::{emit_waiting, LineNotifyBuilder, NotifySink};
pub use deduplication::DuplicateFilter;
pub use layer::NotifyLayer;
pub use notification::NotifyError;
