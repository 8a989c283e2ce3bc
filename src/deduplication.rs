// Decorator that suppresses repeated log events.

use crate::core::{EventSink, Level, LogEvent, SinkError};
use async_trait::async_trait;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use moka::Expiry;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// The cache backing a `DuplicateFilter`, keyed by fingerprint.
///
/// Any cache of this type works. Entries carry their own cooldown, so a
/// cache without an expiry policy only holds stale entries longer.
pub type FingerprintCache = Cache<String, Arc<FingerprintEntry>>;

/// What the filter remembers about a fingerprint while it is blocked.
#[derive(Debug)]
pub struct FingerprintEntry {
    message_template: String,
    duplicate_count: AtomicU64,
    block_span: Duration,
    created_at: Instant,
}

impl FingerprintEntry {
    fn new(message_template: &str, block_span: Duration) -> Self {
        Self {
            message_template: message_template.to_string(),
            duplicate_count: AtomicU64::new(0),
            block_span,
            created_at: Instant::now(),
        }
    }

    fn remaining(&self) -> Duration {
        self.block_span.saturating_sub(self.created_at.elapsed())
    }

    /// Whether repeats of this fingerprint are still suppressed.
    pub fn is_blocking(&self) -> bool {
        !self.remaining().is_zero()
    }

    pub fn message_template(&self) -> &str {
        &self.message_template
    }

    /// Number of emissions forwarded while this entry was live.
    pub fn duplicate_count(&self) -> u64 {
        self.duplicate_count.load(Ordering::SeqCst)
    }
}

/// Expires each entry `block_span` after it was created. Reads and updates
/// keep the original deadline.
struct BlockSpanExpiry;

impl Expiry<String, Arc<FingerprintEntry>> for BlockSpanExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<FingerprintEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<FingerprintEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining())
    }
}

/// Builds a cache suitable for `DuplicateFilter::with_cache`.
pub fn fingerprint_cache(max_capacity: u64) -> FingerprintCache {
    Cache::builder()
        .max_capacity(max_capacity)
        .expire_after(BlockSpanExpiry)
        .build()
}

/// Computes the 512-bit fingerprint of a (level, template) pair as lowercase hex.
pub fn fingerprint(level: Level, message_template: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(level.as_str().as_bytes());
    hasher.update(b"-");
    hasher.update(message_template.as_bytes());

    let mut digest = [0u8; 64];
    hasher.finalize_xof().fill(&mut digest);

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// A sink decorator that forwards the first event of each (level, template)
/// pair and drops repeats until `block_span` has elapsed.
pub struct DuplicateFilter<S: EventSink> {
    inner: S,
    cache: FingerprintCache,
    block_span: Duration,
    disposed: AtomicBool,
}

impl<S: EventSink> DuplicateFilter<S> {
    /// Creates a new `DuplicateFilter` with its own cache.
    ///
    /// # Arguments
    /// * `inner` - The sink receiving forwarded events.
    /// * `block_span` - How long a fingerprint blocks repeats.
    pub fn new(inner: S, block_span: Duration) -> Self {
        Self::with_cache(inner, block_span, fingerprint_cache(DEFAULT_CACHE_CAPACITY))
    }

    /// Creates a `DuplicateFilter` over an existing cache. A cache built by
    /// `fingerprint_cache` also evicts entries once their cooldown ends.
    /// The filter takes over disposal of the cache.
    pub fn with_cache(inner: S, block_span: Duration, cache: FingerprintCache) -> Self {
        Self {
            inner,
            cache,
            block_span,
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns the live entry for a (level, template) pair, if any.
    pub fn entry_for(&self, level: Level, message_template: &str) -> Option<Arc<FingerprintEntry>> {
        self.cache
            .get(&fingerprint(level, message_template))
            .filter(|entry| entry.is_blocking())
    }
}

#[async_trait]
impl<S: EventSink> EventSink for DuplicateFilter<S> {
    fn emit(&self, event: LogEvent) -> Result<(), SinkError> {
        let key = fingerprint(event.level, &event.message_template);
        // An entry past its cooldown counts as absent even if the cache still holds it.
        let result = self.cache.entry(key).and_compute_with(|current| match current {
            Some(entry) if entry.value().is_blocking() => Op::Nop,
            _ => Op::Put(Arc::new(FingerprintEntry::new(&event.message_template, self.block_span))),
        });

        let entry = match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => entry,
            _ => {
                trace!(template = %event.message_template, "Suppressed duplicate log event");
                metrics::counter!("notify_events_suppressed_total").increment(1);
                return Ok(());
            }
        };

        entry.value().duplicate_count.fetch_add(1, Ordering::SeqCst);
        self.inner.emit(event)
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.dispose().await;
        self.cache.invalidate_all();
    }
}
