use prometheus::{Counter, CounterVec, Gauge, Opts, Registry};
use std::sync::Arc;

/// Process-wide admission-control metrics
pub struct Metrics {
    pub registry: Registry,

    // Admission metrics
    pub admission_total: CounterVec,

    // Bucket store metrics
    pub buckets: Gauge,
    pub bucket_evictions_total: Counter,
    pub sweep_failures_total: Counter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let admission_total = CounterVec::new(
            Opts::new(
                "turnstile_admission_total",
                "Admission decisions by outcome (exempt, admitted, rejected, failed)",
            ),
            &["outcome"],
        )?;

        let buckets = Gauge::new(
            "turnstile_buckets",
            "Token buckets currently held in memory",
        )?;

        let bucket_evictions_total = Counter::new(
            "turnstile_bucket_evictions_total",
            "Idle token buckets removed by reclamation sweeps",
        )?;

        let sweep_failures_total = Counter::new(
            "turnstile_sweep_failures_total",
            "Reclamation sweeps that panicked",
        )?;

        registry.register(Box::new(admission_total.clone()))?;
        registry.register(Box::new(buckets.clone()))?;
        registry.register(Box::new(bucket_evictions_total.clone()))?;
        registry.register(Box::new(sweep_failures_total.clone()))?;

        Ok(Self {
            registry,
            admission_total,
            buckets,
            bucket_evictions_total,
            sweep_failures_total,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::default()));
