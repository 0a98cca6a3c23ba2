/// Background reclamation of idle buckets
use super::store::BucketStore;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handle to the recurring sweep task. Dropping it leaves the task running
/// until the runtime shuts down; call [`ReclamationScheduler::shutdown`] to stop it.
pub struct ReclamationScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReclamationScheduler {
    /// Spawn the sweep loop on the current tokio runtime. The first sweep runs
    /// one `every` after start.
    pub fn start(store: Arc<BucketStore>, every: Duration, ttl: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => run_sweep(&store, ttl),
                }
            }

            debug!("Bucket reclamation stopped");
        });

        info!(
            interval_secs = every.as_secs(),
            ttl_secs = ttl.as_secs(),
            "✓ Bucket reclamation scheduled"
        );

        Self { cancel, handle }
    }

    /// Cancel the loop and wait up to `grace` for an in-flight sweep to
    /// finish before aborting it. Returns whether the task stopped on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel.cancel();
        let mut handle = self.handle;

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {
                debug!("Bucket reclamation drained");
                true
            }
            Ok(Err(e)) => {
                error!("Bucket reclamation task failed: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Bucket reclamation did not stop in time, aborting"
                );
                handle.abort();
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// One sweep. A panic is contained here so later ticks still run.
fn run_sweep(store: &BucketStore, ttl: Duration) {
    match catch_unwind(AssertUnwindSafe(|| store.sweep(ttl))) {
        Ok(0) => {}
        Ok(removed) => debug!(removed, remaining = store.len(), "Evicted idle buckets"),
        Err(_) => {
            error!("Bucket sweep panicked; will retry on next tick");
            crate::metrics::METRICS.sweep_failures_total.inc();
        }
    }
}
