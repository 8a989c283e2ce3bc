//! The periodic batching sink queues emitted events and hands them to a
//! `BatchedSink` from a single background worker.

use crate::core::{BatchedSink, ConfigError, EventSink, LogEvent, SinkError};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Flush cadence and queue bounds for a `PeriodicBatchingSink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchingOptions {
    /// Flush as soon as this many events are waiting.
    pub batch_size_limit: usize,
    /// Flush at least this often, even with nothing queued.
    pub period: Duration,
    /// Maximum number of events waiting for the worker. Newer events are
    /// rejected with `SinkError::QueueFull` while the queue is full.
    pub queue_limit: usize,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            batch_size_limit: 1,
            period: Duration::from_secs(1),
            queue_limit: 1000,
        }
    }
}

impl BatchingOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size_limit == 0 {
            return Err(ConfigError::InvalidBatching(
                "batch_size_limit must be at least 1".to_string(),
            ));
        }
        if self.queue_limit == 0 {
            return Err(ConfigError::InvalidBatching(
                "queue_limit must be at least 1".to_string(),
            ));
        }
        if self.period.is_zero() {
            return Err(ConfigError::InvalidBatching(
                "period must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decouples `emit` from delivery.
///
/// `emit` only enqueues. One worker task owns the wrapped sink and performs
/// every flush, so `emit_batch` is never called concurrently.
pub struct PeriodicBatchingSink {
    queue: Mutex<Option<mpsc::Sender<LogEvent>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    queue_limit: usize,
}

impl PeriodicBatchingSink {
    /// Creates the sink and spawns its worker on the current tokio runtime.
    pub fn new<B: BatchedSink + 'static>(inner: B, options: BatchingOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let (tx, rx) = mpsc::channel(options.queue_limit);
        let queue_limit = options.queue_limit;
        let worker = tokio::spawn(run_worker(inner, rx, options));
        Ok(Self {
            queue: Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            queue_limit,
        })
    }
}

#[async_trait]
impl EventSink for PeriodicBatchingSink {
    fn emit(&self, event: LogEvent) -> Result<(), SinkError> {
        let queue = self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = queue.as_ref().ok_or(SinkError::Closed)?;
        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics::counter!("notify_events_dropped_total").increment(1);
                Err(SinkError::QueueFull {
                    limit: self.queue_limit,
                })
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    /// Stops accepting events, flushes what is queued and disposes the
    /// wrapped sink.
    async fn dispose(&self) {
        let tx = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(tx);

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Batching worker task failed");
            }
        }
    }
}

/// Runs the worker's main loop until the queue is closed.
async fn run_worker<B: BatchedSink>(inner: B, mut rx: mpsc::Receiver<LogEvent>, options: BatchingOptions) {
    let mut batch = Vec::with_capacity(options.batch_size_limit);
    let mut timer = interval(options.period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = timer.tick() => {
                if batch.is_empty() {
                    inner.on_empty_batch().await;
                } else {
                    debug!("Batch timer expired, sending {} events", batch.len());
                    send_batch(&inner, &mut batch).await;
                }
            }
            received = rx.recv() => {
                match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= options.batch_size_limit {
                            debug!("Batch size limit reached, sending {} events", batch.len());
                            send_batch(&inner, &mut batch).await;
                            timer.reset();
                        }
                    }
                    None => {
                        info!("Event queue closed. Shutting down batching worker.");
                        if !batch.is_empty() {
                            debug!("Sending final batch of {} events.", batch.len());
                            send_batch(&inner, &mut batch).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    inner.dispose().await;
}

/// Sends the current batch and clears it. Failures are logged, never retried.
async fn send_batch<B: BatchedSink>(inner: &B, batch: &mut Vec<LogEvent>) {
    if let Err(e) = inner.emit_batch(batch.as_slice()).await {
        warn!(events = batch.len(), "Dropping batch after delivery failure");
        error!(error = %e, "Failed to emit notification batch");
        metrics::counter!("notify_batch_failures_total").increment(1);
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Level;
    use crate::notification::NotifyError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{advance, pause};

    // A fake batched sink that records each batch it receives.
    #[derive(Clone, Default)]
    struct FakeBatchedSink {
        batches: Arc<Mutex<Vec<Vec<LogEvent>>>>,
        empty_ticks: Arc<AtomicUsize>,
        disposed: Arc<AtomicBool>,
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl FakeBatchedSink {
        fn sent_batches(&self) -> Vec<Vec<LogEvent>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchedSink for FakeBatchedSink {
        async fn emit_batch(&self, events: &[LogEvent]) -> Result<(), NotifyError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.batches.lock().unwrap().push(events.to_vec());
            self.in_flight.store(false, Ordering::SeqCst);
            if self.fail {
                return Err(NotifyError::Delivery {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(())
        }

        async fn on_empty_batch(&self) {
            self.empty_ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    fn event(message: &str) -> LogEvent {
        LogEvent::new(Level::Information, message)
    }

    #[tokio::test]
    async fn test_sends_on_batch_size() {
        let fake = FakeBatchedSink::default();
        let options = BatchingOptions {
            batch_size_limit: 2,
            period: Duration::from_secs(60),
            queue_limit: 100,
        };
        let sink = PeriodicBatchingSink::new(fake.clone(), options).unwrap();

        sink.emit(event("one")).unwrap();
        sink.emit(event("two")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let batches = fake.sent_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].message_template, "one");
        assert_eq!(batches[0][1].message_template, "two");
    }

    #[tokio::test]
    async fn test_sends_partial_batch_on_period() {
        pause();
        let fake = FakeBatchedSink::default();
        let options = BatchingOptions {
            batch_size_limit: 10,
            period: Duration::from_secs(5),
            queue_limit: 100,
        };
        let sink = PeriodicBatchingSink::new(fake.clone(), options).unwrap();

        sink.emit(event("lonely")).unwrap();
        // Let the worker move the event off the queue before the clock jumps.
        tokio::time::sleep(Duration::from_millis(1)).await;
        advance(Duration::from_secs(6)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let batches = fake.sent_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[tokio::test]
    async fn test_empty_ticks_call_on_empty_batch() {
        pause();
        let fake = FakeBatchedSink::default();
        let _sink = PeriodicBatchingSink::new(fake.clone(), BatchingOptions::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(fake.empty_ticks.load(Ordering::SeqCst) >= 3);
        assert!(fake.sent_batches().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_newest_event() {
        pause();
        let fake = FakeBatchedSink {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let options = BatchingOptions {
            batch_size_limit: 1,
            period: Duration::from_secs(1),
            queue_limit: 2,
        };
        let sink = PeriodicBatchingSink::new(fake.clone(), options).unwrap();

        // The worker picks up the first event and stalls in emit_batch.
        sink.emit(event("in flight")).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        sink.emit(event("queued 1")).unwrap();
        sink.emit(event("queued 2")).unwrap();
        assert_eq!(
            sink.emit(event("rejected")),
            Err(SinkError::QueueFull { limit: 2 })
        );

        sink.dispose().await;
        let delivered: Vec<String> = fake
            .sent_batches()
            .into_iter()
            .flatten()
            .map(|e| e.message_template)
            .collect();
        assert_eq!(delivered, vec!["in flight", "queued 1", "queued 2"]);
    }

    #[tokio::test]
    async fn test_flushes_never_overlap() {
        let fake = FakeBatchedSink {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let sink = Arc::new(PeriodicBatchingSink::new(fake.clone(), BatchingOptions::default()).unwrap());

        let mut handles = Vec::new();
        for caller in 0..4 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..5 {
                    sink.emit(event(&format!("{}-{}", caller, i))).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        sink.dispose().await;

        assert!(!fake.overlapped.load(Ordering::SeqCst));
        let total: usize = fake.sent_batches().iter().map(|b| b.len()).sum();
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_worker() {
        let fake = FakeBatchedSink {
            fail: true,
            ..Default::default()
        };
        let sink = PeriodicBatchingSink::new(fake.clone(), BatchingOptions::default()).unwrap();

        sink.emit(event("first")).unwrap();
        sink.emit(event("second")).unwrap();
        sink.dispose().await;

        assert_eq!(fake.sent_batches().len(), 2);
    }

    #[tokio::test]
    async fn test_dispose_flushes_and_closes() {
        let fake = FakeBatchedSink::default();
        let options = BatchingOptions {
            batch_size_limit: 100,
            period: Duration::from_secs(60),
            queue_limit: 100,
        };
        let sink = PeriodicBatchingSink::new(fake.clone(), options).unwrap();

        sink.emit(event("pending")).unwrap();
        sink.dispose().await;
        sink.dispose().await;

        assert_eq!(fake.sent_batches().len(), 1);
        assert!(fake.disposed.load(Ordering::SeqCst));
        assert_eq!(sink.emit(event("late")), Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let options = BatchingOptions {
            queue_limit: 0,
            ..Default::default()
        };
        let result = PeriodicBatchingSink::new(FakeBatchedSink::default(), options);
        assert!(matches!(result, Err(ConfigError::InvalidBatching(_))));
    }
}
