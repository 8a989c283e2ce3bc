//! Forwards `tracing` events into an `EventSink`.
//!
//! The `message` field becomes the event's template, an `error` field
//! becomes its exception text and every other field is stored as a
//! property. Events emitted by this crate are skipped so that the sink's
//! own diagnostics never loop back into it.

use crate::core::{EventSink, Level, LogEvent};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub struct NotifyLayer<S> {
    sink: S,
}

impl<S: EventSink> NotifyLayer<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S, R> Layer<R> for NotifyLayer<S>
where
    S: EventSink + 'static,
    R: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, R>) {
        let metadata = event.metadata();
        if is_own_target(metadata.target()) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(Level::from(*metadata.level()), visitor.message);
        log_event.properties = visitor.properties;
        log_event.exception = visitor.exception;

        // There is nowhere to report a rejected event from inside a layer.
        let _ = self.sink.emit(log_event);
    }
}

fn is_own_target(target: &str) -> bool {
    const CRATE: &str = env!("CARGO_CRATE_NAME");
    target == CRATE || target.starts_with(concat!(env!("CARGO_CRATE_NAME"), "::"))
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    exception: Option<String>,
    properties: std::collections::BTreeMap<String, String>,
}

impl EventVisitor {
    fn store(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "error" => self.exception = Some(value),
            name => {
                self.properties.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{:?}", value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SinkError;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

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
    fn test_tracing_event_becomes_log_event() {
        let recorder = Arc::new(RecordingSink::default());
        let subscriber = tracing_subscriber::registry().with(NotifyLayer::new(recorder.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "billing", order = "A-1", retries = 3, "Payment retry limit reached");
            tracing::error!(target: "billing", error = "connection reset", "Payment failed");
        });

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, Level::Warning);
        assert_eq!(events[0].message_template, "Payment retry limit reached");
        assert_eq!(events[0].properties["order"], "A-1");
        assert_eq!(events[0].properties["retries"], "3");
        assert_eq!(events[1].level, Level::Error);
        assert_eq!(events[1].exception.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_events_from_this_crate_are_ignored() {
        let recorder = Arc::new(RecordingSink::default());
        let subscriber = tracing_subscriber::registry().with(NotifyLayer::new(recorder.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("Failed to emit notification batch");
        });

        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_crates_sharing_the_name_prefix_are_forwarded() {
        let recorder = Arc::new(RecordingSink::default());
        let subscriber = tracing_subscriber::registry().with(NotifyLayer::new(recorder.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "line_notify_sink_ext", "Extension failed");
            tracing::error!(target: "line_notify_sink", "Skipped");
            tracing::error!(target: "line_notify_sink::notification", "Skipped too");
        });

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message_template, "Extension failed");
    }
}
