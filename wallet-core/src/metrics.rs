//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the wallet ledger. Metrics are ambient:
//! they never gate correctness and recording failures are impossible by
//! construction (counters only).
//!
//! # Metrics
//!
//! - `wallet_entries_total` - Entries appended
//! - `wallet_rejections_total` - Rejected mutations, labelled by reason
//! - `wallet_idempotent_replays_total` - Stored results replayed to retries
//! - `wallet_lock_timeouts_total` - Bounded lock waits that expired
//! - `wallet_batches_total` - Offline batches reconciled
//! - `wallet_batch_entries` - Histogram of offline batch sizes
//! - `wallet_apply_duration_seconds` - Histogram of apply latencies

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Entries appended
    pub entries_total: IntCounter,

    /// Rejections by reason
    pub rejections_total: IntCounterVec,

    /// Idempotent replays served from stored results
    pub replays_total: IntCounter,

    /// Lock waits that hit the bounded timeout
    pub lock_timeouts_total: IntCounter,

    /// Offline batches reconciled
    pub batches_total: IntCounter,

    /// Offline batch size histogram
    pub batch_entries: Histogram,

    /// Apply duration histogram
    pub apply_duration: Histogram,

    /// Prometheus registry
    registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total = IntCounter::with_opts(Opts::new(
            "wallet_entries_total",
            "Total number of ledger entries appended",
        ))?;
        registry.register(Box::new(entries_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new(
                "wallet_rejections_total",
                "Total number of rejected mutations by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let replays_total = IntCounter::with_opts(Opts::new(
            "wallet_idempotent_replays_total",
            "Total number of stored results replayed to retries",
        ))?;
        registry.register(Box::new(replays_total.clone()))?;

        let lock_timeouts_total = IntCounter::with_opts(Opts::new(
            "wallet_lock_timeouts_total",
            "Total number of bounded lock waits that expired",
        ))?;
        registry.register(Box::new(lock_timeouts_total.clone()))?;

        let batches_total = IntCounter::with_opts(Opts::new(
            "wallet_batches_total",
            "Total number of offline batches reconciled",
        ))?;
        registry.register(Box::new(batches_total.clone()))?;

        let batch_entries = Histogram::with_opts(
            HistogramOpts::new("wallet_batch_entries", "Histogram of offline batch sizes")
                .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;
        registry.register(Box::new(batch_entries.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wallet_apply_duration_seconds",
                "Histogram of apply latencies",
            )
            .buckets(vec![
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0,
            ]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        Ok(Self {
            entries_total,
            rejections_total,
            replays_total,
            lock_timeouts_total,
            batches_total,
            batch_entries,
            apply_duration,
            registry,
        })
    }

    /// Record an appended entry
    pub fn record_append(&self) {
        self.entries_total.inc();
    }

    /// Record a rejected mutation
    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    /// Record an idempotent replay
    pub fn record_replay(&self) {
        self.replays_total.inc();
    }

    /// Record an expired lock wait
    pub fn record_lock_timeout(&self) {
        self.lock_timeouts_total.inc();
    }

    /// Record a reconciled batch
    pub fn record_batch(&self, entries: usize) {
        self.batches_total.inc();
        self.batch_entries.observe(entries as f64);
    }

    /// Record an apply duration
    pub fn record_apply_duration(&self, seconds: f64) {
        self.apply_duration.observe(seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metrics registry construction cannot fail")
    }
}
