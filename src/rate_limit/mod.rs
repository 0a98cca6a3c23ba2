//! Per-caller token-bucket admission control.
//!
//! [`RateLimiter`] owns the bucket store and its reclamation task. Construct
//! it once at startup, call [`RateLimiter::start_reclamation`], share it with
//! the [`filter::admission_control`] middleware, and call
//! [`RateLimiter::shutdown`] when the server stops.

pub mod bucket;
pub mod clock;
pub mod error;
pub mod filter;
pub mod key;
pub mod reclaim;
pub mod store;

pub use bucket::{Consumption, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AdmissionError;
pub use key::{KeyResolver, Principal, RequestDescriptor};
pub use reclaim::ReclamationScheduler;
pub use store::{BucketEntry, BucketStore};

use crate::config::RateLimitConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Every bucket refills its full capacity once per minute
pub const WINDOW: Duration = Duration::from_secs(60);

/// Telemetry reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds
    pub reset: i64,
    /// Seconds until the bucket is full again, at least 1. Refill is
    /// continuous, so a client may be admitted again well before this.
    pub retry_after: u64,
}

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Limiting disabled or path exempt; no bucket touched
    Exempt,
    Admitted(RateLimitInfo),
    Rejected(RateLimitInfo),
    /// The check itself failed. The caller chooses what to do with the request.
    Failed(AdmissionError),
}

impl Decision {
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Exempt => "exempt",
            Decision::Admitted(_) => "admitted",
            Decision::Rejected(_) => "rejected",
            Decision::Failed(_) => "failed",
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<BucketStore>,
    resolver: KeyResolver,
    reclamation: Mutex<Option<ReclamationScheduler>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(BucketStore::new(
            config.requests_per_minute,
            WINDOW,
            config.max_buckets,
            clock,
        ));

        Self {
            config,
            store,
            resolver: KeyResolver,
            reclamation: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<BucketStore> {
        &self.store
    }

    /// Spawn the background sweep. Must be called from inside a tokio
    /// runtime; calling it again while a sweep task is running does nothing.
    pub fn start_reclamation(&self) {
        if !self.config.enabled {
            debug!("Rate limiting disabled, not scheduling bucket reclamation");
            return;
        }

        let mut slot = self.reclamation.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(ReclamationScheduler::start(
                Arc::clone(&self.store),
                Duration::from_secs(self.config.sweep_interval_secs),
                Duration::from_secs(self.config.bucket_ttl_secs),
            ));
        }
    }

    /// Stop the background sweep, waiting at most the configured grace period
    pub async fn shutdown(&self) {
        let scheduler = self
            .reclamation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(scheduler) = scheduler {
            scheduler
                .shutdown(Duration::from_secs(self.config.shutdown_grace_secs))
                .await;
        }
    }

    /// Decide whether a request may proceed, spending one token if so
    pub fn check(&self, request: &RequestDescriptor<'_>) -> Decision {
        let decision = if !self.config.enabled || self.config.is_exempt(request.path) {
            Decision::Exempt
        } else {
            self.consume(request).unwrap_or_else(Decision::Failed)
        };

        crate::metrics::METRICS
            .admission_total
            .with_label_values(&[decision.outcome()])
            .inc();

        decision
    }

    fn consume(&self, request: &RequestDescriptor<'_>) -> Result<Decision, AdmissionError> {
        let key = self.resolver.resolve(request);
        let entry = self.store.get_or_create(&key)?;
        let bucket = entry.bucket();

        let consumption = bucket
            .try_consume(self.store.clock().now())
            .map_err(|_| AdmissionError::BucketPoisoned { key: key.clone() })?;

        let info = RateLimitInfo {
            limit: bucket.capacity(),
            remaining: consumption.remaining,
            reset: chrono::Utc::now().timestamp() + bucket.window().as_secs() as i64,
            retry_after: consumption.until_full.as_secs_f64().ceil().max(1.0) as u64,
        };

        if consumption.admitted {
            Ok(Decision::Admitted(info))
        } else {
            debug!(key = %key, retry_after = info.retry_after, "Rate limit exceeded");
            Ok(Decision::Rejected(info))
        }
    }
}
