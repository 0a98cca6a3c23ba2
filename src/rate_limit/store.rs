/// Concurrent key -> bucket store with idle eviction
use super::bucket::TokenBucket;
use super::clock::Clock;
use super::error::AdmissionError;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// One caller's bucket plus the bookkeeping eviction needs
#[derive(Debug)]
pub struct BucketEntry {
    bucket: TokenBucket,
    // Nanoseconds since the owning store's epoch
    last_access: AtomicU64,
}

impl BucketEntry {
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    fn touch(&self, offset: u64) {
        self.last_access.fetch_max(offset, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Maps admission keys to buckets. Sharded, so callers with different keys
/// almost never wait on each other, and no shard lock is held while a bucket
/// is consumed.
pub struct BucketStore {
    entries: DashMap<String, Arc<BucketEntry>>,
    capacity: u32,
    window: Duration,
    max_buckets: usize,
    epoch: Instant,
    clock: Arc<dyn Clock>,
}

impl BucketStore {
    /// `max_buckets = 0` means no ceiling
    pub fn new(capacity: u32, window: Duration, max_buckets: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            window,
            max_buckets,
            epoch: clock.now(),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Fetch the bucket for `key`, creating a full one on first sight. Every
    /// caller racing on a new key gets the same entry. Marks the entry as
    /// accessed.
    pub fn get_or_create(&self, key: &str) -> Result<Arc<BucketEntry>, AdmissionError> {
        let now = self.clock.now();
        let offset = self.offset(now);

        let existing = self.entries.get(key).map(|slot| Arc::clone(slot.value()));
        if let Some(entry) = existing {
            entry.touch(offset);
            return Ok(entry);
        }

        if self.max_buckets > 0 && self.entries.len() >= self.max_buckets {
            return Err(AdmissionError::StoreFull {
                key: key.to_string(),
                max_buckets: self.max_buckets,
            });
        }

        let mut created = false;
        let entry = {
            let slot = self.entries.entry(key.to_string()).or_insert_with(|| {
                created = true;
                Arc::new(BucketEntry {
                    bucket: TokenBucket::new(self.capacity, self.window, now),
                    last_access: AtomicU64::new(offset),
                })
            });
            Arc::clone(slot.value())
        };

        if created {
            debug!(key = %key, capacity = self.capacity, "Created token bucket");
            crate::metrics::METRICS.buckets.inc();
        } else {
            entry.touch(offset);
        }

        Ok(entry)
    }

    /// Drop every entry idle for at least `ttl`. Returns how many were removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let now = self.offset(self.clock.now());
        let ttl = ttl.as_nanos().min(u64::MAX as u128) as u64;
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            let keep = now.saturating_sub(entry.last_access()) < ttl;
            if !keep {
                removed += 1;
            }
            keep
        });

        crate::metrics::METRICS.buckets.set(self.entries.len() as f64);
        crate::metrics::METRICS.bucket_evictions_total.inc_by(removed as f64);

        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn offset(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch)
            .as_nanos()
            .min(u64::MAX as u128) as u64
    }
}
